//! Weather forecast from Open-Meteo.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{f64_arg, Tool, ToolContext};

const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";
const DAILY: &str = "temperature_2m_max,temperature_2m_min";
const HOURLY: &str = "temperature_2m,relative_humidity_2m,apparent_temperature,rain,showers,snowfall,snow_depth,surface_pressure,cloud_cover,visibility";
const CURRENT: &str = "is_day,wind_speed_10m,wind_direction_10m,wind_gusts_10m";

/// Coordinates are rounded to two decimals before querying.
fn forecast_url(latitude: f64, longitude: f64) -> anyhow::Result<url::Url> {
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        anyhow::bail!("Coordinates out of range: {}, {}", latitude, longitude);
    }
    let url = url::Url::parse_with_params(
        FORECAST_URL,
        &[
            ("latitude", format!("{:.2}", latitude)),
            ("longitude", format!("{:.2}", longitude)),
            ("daily", DAILY.to_string()),
            ("hourly", HOURLY.to_string()),
            ("current", CURRENT.to_string()),
            ("timezone", "auto".to_string()),
        ],
    )?;
    Ok(url)
}

pub struct WeatherForecast;

#[async_trait]
impl Tool for WeatherForecast {
    fn name(&self) -> &str {
        "get_weather_data"
    }

    fn description(&self) -> &str {
        "Get the current weather and forecast for a location given by latitude and longitude (rounded to 2 decimal places). Returns raw JSON from Open-Meteo."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "latitude": {"type": "number", "description": "Latitude in degrees"},
                "longitude": {"type": "number", "description": "Longitude in degrees"}
            },
            "required": ["latitude", "longitude"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let url = forecast_url(f64_arg(&args, "latitude")?, f64_arg(&args, "longitude")?)?;
        tracing::debug!(%url, "Requesting forecast");

        let response = ctx.http.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            anyhow::bail!("Weather service returned {}: {}", status, body);
        }
        Ok(body)
    }
}
