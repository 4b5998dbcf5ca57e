use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DailyForecast {
    pub date: String,
    pub max_temp: f64,
    pub min_temp: f64,
    pub condition: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WeatherReport {
    pub location: String,
    pub current_temp: f64,
    pub forecast: Vec<DailyForecast>,
}

#[derive(Debug, Error)]
pub enum WeatherError {
    /// Never carries the request URL: its query string holds the API key.
    #[error("weather request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("weather service returned status {0}")]
    Status(u16),
}

impl From<reqwest::Error> for WeatherError {
    fn from(err: reqwest::Error) -> Self {
        Self::Request(err.without_url())
    }
}

#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn forecast(&self, city: &str, days: u8) -> Result<WeatherReport, WeatherError>;
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    location: RawLocation,
    current: RawCurrent,
    forecast: RawForecast,
}

#[derive(Debug, Deserialize)]
struct RawLocation {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawCurrent {
    temp_c: f64,
}

#[derive(Debug, Deserialize)]
struct RawForecast {
    forecastday: Vec<RawForecastDay>,
}

#[derive(Debug, Deserialize)]
struct RawForecastDay {
    date: String,
    day: RawDay,
}

#[derive(Debug, Deserialize)]
struct RawDay {
    maxtemp_c: f64,
    mintemp_c: f64,
    condition: RawCondition,
}

#[derive(Debug, Deserialize)]
struct RawCondition {
    text: String,
}

impl ForecastResponse {
    fn into_report(self, days: u8) -> WeatherReport {
        WeatherReport {
            location: self.location.name,
            current_temp: self.current.temp_c,
            forecast: self
                .forecast
                .forecastday
                .into_iter()
                .take(usize::from(days))
                .map(|day| DailyForecast {
                    date: day.date,
                    max_temp: day.day.maxtemp_c,
                    min_temp: day.day.mintemp_c,
                    condition: day.day.condition.text,
                })
                .collect(),
        }
    }
}

/// Client for the weatherapi.com forecast endpoint.
#[derive(Debug, Clone)]
pub struct WeatherApiClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl WeatherApiClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, WeatherError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl WeatherProvider for WeatherApiClient {
    async fn forecast(&self, city: &str, days: u8) -> Result<WeatherReport, WeatherError> {
        let days_param = days.to_string();
        let response = self
            .client
            .get(format!("{}/forecast.json", self.base_url))
            .query(&[
                ("key", self.api_key.as_str()),
                ("q", city),
                ("days", days_param.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(WeatherError::Status(status.as_u16()));
        }

        let body: ForecastResponse = response.json().await?;
        Ok(body.into_report(days))
    }
}
