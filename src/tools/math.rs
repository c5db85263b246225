//! Arithmetic evaluation and single-variable equation solving.

use std::fmt;
use std::sync::OnceLock;

use async_trait::async_trait;
use evalexpr::{
    ContextWithMutableFunctions, ContextWithMutableVariables, EvalexprError, Function,
    HashMapContext, Node, Value as ExprValue,
};
use regex::Regex;
use serde_json::{json, Value};

use super::{str_arg, Tool, ToolContext};

const SCAN_MIN: f64 = -1000.0;
const SCAN_MAX: f64 = 1000.0;
const SCAN_STEPS: usize = 40_000;
const MAX_LISTED_ROOTS: usize = 20;

// Integer literals become floats so `7/2` is 3.5, not 3.
fn normalize(expr: &str) -> String {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    let token = TOKEN.get_or_init(|| {
        Regex::new(r"[A-Za-z_][A-Za-z0-9_:]*|(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?")
            .expect("static regex")
    });
    let expr = expr.replace("**", "^");
    token
        .replace_all(&expr, |caps: &regex::Captures| {
            let tok = &caps[0];
            if !tok.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
                tok.to_string()
            } else if tok.starts_with('.') {
                format!("0{}", tok)
            } else if tok.contains(['.', 'e', 'E']) {
                tok.to_string()
            } else {
                format!("{}.0", tok)
            }
        })
        .into_owned()
}

fn unary(f: fn(f64) -> f64) -> Function {
    Function::new(move |arg| Ok(ExprValue::Float(f(arg.as_number()?))))
}

fn math_context() -> Result<HashMapContext, EvalexprError> {
    let mut ctx = HashMapContext::new();
    ctx.set_value("pi".into(), ExprValue::Float(std::f64::consts::PI))?;
    ctx.set_value("e".into(), ExprValue::Float(std::f64::consts::E))?;
    let functions: [(&str, fn(f64) -> f64); 13] = [
        ("sqrt", f64::sqrt),
        ("sin", f64::sin),
        ("cos", f64::cos),
        ("tan", f64::tan),
        ("asin", f64::asin),
        ("acos", f64::acos),
        ("atan", f64::atan),
        ("exp", f64::exp),
        ("ln", f64::ln),
        ("log", f64::ln),
        ("log10", f64::log10),
        ("log2", f64::log2),
        ("abs", f64::abs),
    ];
    for (name, f) in functions {
        ctx.set_function(name.into(), unary(f))?;
    }
    Ok(ctx)
}

/// Human-readable number: integers without a fraction, others trimmed.
fn format_number(v: f64) -> String {
    if v == 0.0 {
        return "0".to_string();
    }
    if (v - v.round()).abs() < 1e-9 && v.abs() < 1e15 {
        return format!("{}", v.round() as i64);
    }
    let s = format!("{:.10}", v);
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Evaluate an arithmetic expression.
pub fn evaluate_expression(expr: &str) -> anyhow::Result<String> {
    let ctx = math_context()?;
    let value = evalexpr::eval_with_context(&normalize(expr), &ctx)
        .map_err(|e| anyhow::anyhow!("Cannot evaluate '{}': {}", expr, e))?;
    match value {
        ExprValue::Float(f) if !f.is_finite() => {
            anyhow::bail!("Cannot evaluate '{}': result is not a finite number", expr)
        }
        ExprValue::Float(f) => Ok(format_number(f)),
        other => Ok(other.to_string()),
    }
}

/// Solution set of an equation over the reals.
#[derive(Debug, Clone, PartialEq)]
pub enum Solution {
    None,
    Infinite,
    Roots(Vec<f64>),
}

impl fmt::Display for Solution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Solution::None => write!(f, "No solutions found."),
            Solution::Infinite => write!(f, "Infinitely many solutions."),
            Solution::Roots(roots) => {
                let listed: Vec<String> = roots
                    .iter()
                    .take(MAX_LISTED_ROOTS)
                    .map(|r| format_number(*r))
                    .collect();
                write!(f, "{}", listed.join("; "))?;
                if roots.len() > MAX_LISTED_ROOTS {
                    write!(f, "; ... ({} solutions in total)", roots.len())?;
                }
                Ok(())
            }
        }
    }
}

struct Equation {
    lhs: Node,
    rhs: Node,
    variable: String,
    ctx: HashMapContext,
}

impl Equation {
    fn parse(equation: &str, variable: &str) -> anyhow::Result<Self> {
        let (lhs, rhs) = equation.split_once('=').unwrap_or((equation, "0"));
        if rhs.contains('=') {
            anyhow::bail!("Equation must contain a single '='");
        }
        let build = |side: &str| {
            evalexpr::build_operator_tree(&normalize(side))
                .map_err(|e| anyhow::anyhow!("Cannot parse '{}': {}", side.trim(), e))
        };
        Ok(Self {
            lhs: build(lhs)?,
            rhs: build(rhs)?,
            variable: variable.to_string(),
            ctx: math_context()?,
        })
    }

    fn eval_at(&mut self, x: f64) -> Result<f64, EvalexprError> {
        self.ctx.set_value(self.variable.clone(), ExprValue::Float(x))?;
        let l = self.lhs.eval_with_context(&self.ctx)?.as_number()?;
        let r = self.rhs.eval_with_context(&self.ctx)?.as_number()?;
        Ok(l - r)
    }

    fn residual(&mut self, x: f64) -> Option<f64> {
        self.eval_at(x).ok().filter(|v| v.is_finite())
    }

    /// Coefficients `(a, b, c)` when the residual is a polynomial of degree
    /// at most two.
    fn as_quadratic(&mut self) -> Option<(f64, f64, f64)> {
        let c = self.residual(0.0)?;
        let f1 = self.residual(1.0)?;
        let fm1 = self.residual(-1.0)?;
        let a = (f1 + fm1) / 2.0 - c;
        let b = (f1 - fm1) / 2.0;

        for x in [2.0, -2.0, 3.0, 0.5, 10.0, -7.0] {
            let actual = self.residual(x)?;
            let predicted = a * x * x + b * x + c;
            if (actual - predicted).abs() > 1e-9 * actual.abs().max(1.0) {
                return None;
            }
        }
        Some((a, b, c))
    }

    fn scan(&mut self) -> Vec<f64> {
        let step = (SCAN_MAX - SCAN_MIN) / SCAN_STEPS as f64;
        let mut roots: Vec<f64> = Vec::new();
        let mut prev: Option<(f64, f64)> = None;

        for i in 0..=SCAN_STEPS {
            let x = SCAN_MIN + i as f64 * step;
            let Some(fx) = self.residual(x) else {
                prev = None;
                continue;
            };
            if fx == 0.0 {
                roots.push(x);
            } else if let Some((px, pf)) = prev {
                if pf * fx < 0.0 {
                    if let Some(root) = self.bisect(px, pf, x, fx) {
                        roots.push(root);
                    }
                }
            }
            prev = Some((x, fx));
        }

        roots.dedup_by(|a, b| (*a - *b).abs() < 1e-6);
        roots
    }

    fn bisect(&mut self, mut lo: f64, mut flo: f64, mut hi: f64, fhi: f64) -> Option<f64> {
        let scale = flo.abs().min(fhi.abs()).max(1.0);
        for _ in 0..100 {
            let mid = (lo + hi) / 2.0;
            let fmid = self.residual(mid)?;
            if fmid == 0.0 {
                return Some(mid);
            }
            if (flo < 0.0) == (fmid < 0.0) {
                lo = mid;
                flo = fmid;
            } else {
                hi = mid;
            }
        }
        let mid = (lo + hi) / 2.0;
        // A sign change across a pole is not a root.
        let fmid = self.residual(mid)?;
        (fmid.abs() <= 1e-6 * scale).then_some(mid)
    }
}

fn snap(x: f64) -> f64 {
    if (x - x.round()).abs() < 1e-9 {
        x.round()
    } else {
        x
    }
}

fn solve_quadratic(a: f64, b: f64, c: f64) -> Solution {
    let scale = a.abs().max(b.abs()).max(c.abs()).max(1.0);
    let tiny = |v: f64| v.abs() < 1e-12 * scale;

    if tiny(a) && tiny(b) {
        return if tiny(c) {
            Solution::Infinite
        } else {
            Solution::None
        };
    }
    if tiny(a) {
        return Solution::Roots(vec![snap(-c / b)]);
    }

    let disc = b * b - 4.0 * a * c;
    if disc.abs() < 1e-12 * (b * b).max(1.0) {
        return Solution::Roots(vec![snap(-b / (2.0 * a))]);
    }
    if disc < 0.0 {
        return Solution::None;
    }

    let q = -0.5 * (b + b.signum() * disc.sqrt());
    let (r1, r2) = if q == 0.0 {
        let s = disc.sqrt() / (2.0 * a);
        (s, -s)
    } else {
        (q / a, c / q)
    };
    let mut roots = vec![snap(r1), snap(r2)];
    roots.sort_by(|x, y| x.total_cmp(y));
    Solution::Roots(roots)
}

/// Solve `equation` (e.g. `x^2 - 5*x + 6 = 0`) for `variable` over the reals.
///
/// Polynomials up to degree two are solved exactly; anything else is
/// root-scanned on [-1000, 1000].
pub fn solve_equation(equation: &str, variable: &str) -> anyhow::Result<Solution> {
    let mut eq = Equation::parse(equation, variable)?;

    // Surface undefined names and other evaluation errors up front.
    let mut first_err = None;
    for x in [0.5, 1.5, -2.5] {
        match eq.eval_at(x) {
            Ok(_) => {
                first_err = None;
                break;
            }
            Err(e) => {
                first_err.get_or_insert(e);
            }
        }
    }
    if let Some(err) = first_err {
        anyhow::bail!("Cannot evaluate '{}': {}", equation, err);
    }

    if let Some((a, b, c)) = eq.as_quadratic() {
        return Ok(solve_quadratic(a, b, c));
    }

    let roots: Vec<f64> = eq.scan().into_iter().map(snap).collect();
    Ok(if roots.is_empty() {
        Solution::None
    } else {
        Solution::Roots(roots)
    })
}

pub struct Calculator;

#[async_trait]
impl Tool for Calculator {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate a mathematical expression. Supports + - * / % ^, parentheses, the constants pi and e, and sqrt, sin, cos, tan, asin, acos, atan, exp, ln, log10, log2, abs."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "Expression to evaluate, e.g. '37593 * 67' or 'sqrt(2) * pi'"
                }
            },
            "required": ["expression"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> anyhow::Result<String> {
        evaluate_expression(str_arg(&args, "expression")?)
    }
}

pub struct SolveEquation;

#[async_trait]
impl Tool for SolveEquation {
    fn name(&self) -> &str {
        "solve_equation"
    }

    fn description(&self) -> &str {
        "Solve an equation in one variable over the real numbers, e.g. 'x^2 - 5*x + 6 = 0'. Returns the solutions separated by '; ', or states that there are none or infinitely many."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "equation": {"type": "string", "description": "Equation containing a single '='"},
                "variable": {"type": "string", "description": "Variable to solve for (default: x)"}
            },
            "required": ["equation"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> anyhow::Result<String> {
        let equation = str_arg(&args, "equation")?.to_string();
        let variable = args["variable"].as_str().unwrap_or("x").to_string();
        if !variable.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            || variable.starts_with(|c: char| c.is_ascii_digit())
            || variable.is_empty()
        {
            anyhow::bail!("Invalid variable name: {}", variable);
        }
        // The root scan evaluates tens of thousands of points.
        let solution =
            tokio::task::spawn_blocking(move || solve_equation(&equation, &variable)).await??;
        Ok(solution.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_arithmetic_uses_floats() {
        assert_eq!(evaluate_expression("37593 * 67").unwrap(), "2518731");
        assert_eq!(evaluate_expression("7/2").unwrap(), "3.5");
        assert_eq!(evaluate_expression("2**10").unwrap(), "1024");
        assert_eq!(evaluate_expression(".5 + 1").unwrap(), "1.5");
    }

    #[test]
    fn constants_and_functions() {
        assert!(evaluate_expression("pi").unwrap().starts_with("3.14159"));
        assert_eq!(evaluate_expression("sqrt(16)").unwrap(), "4");
        assert!(evaluate_expression("e").unwrap().starts_with("2.71828"));
    }

    #[test]
    fn rejects_nonsense_and_division_by_zero() {
        assert!(evaluate_expression("2 +* 3").is_err());
        assert!(evaluate_expression("1/0").is_err());
    }

    #[test]
    fn linear_equation() {
        let s = solve_equation("2*x + 3 = 7", "x").unwrap();
        assert_eq!(s.to_string(), "2");
    }

    #[test]
    fn quadratic_equation_lists_sorted_roots() {
        let s = solve_equation("x^2 - 5*x + 6 = 0", "x").unwrap();
        assert_eq!(s, Solution::Roots(vec![2.0, 3.0]));
        assert_eq!(s.to_string(), "2; 3");
    }

    #[test]
    fn degenerate_equations() {
        assert_eq!(solve_equation("x + 1 = x + 1", "x").unwrap(), Solution::Infinite);
        assert_eq!(solve_equation("x = x + 1", "x").unwrap(), Solution::None);
        assert_eq!(solve_equation("x^2 + 1 = 0", "x").unwrap(), Solution::None);
    }

    #[test]
    fn transcendental_equation_is_scanned() {
        assert_eq!(solve_equation("2^x = 8", "x").unwrap().to_string(), "3");
    }

    #[test]
    fn pole_is_not_a_root() {
        assert_eq!(solve_equation("1/x = 0", "x").unwrap(), Solution::None);
    }

    #[test]
    fn other_variable_names() {
        assert_eq!(solve_equation("3*t = 12", "t").unwrap().to_string(), "4");
        assert!(solve_equation("3*t = 12", "x").is_err());
    }

    #[test]
    fn number_formatting() {
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(1.0 / 3.0), "0.3333333333");
    }
}
