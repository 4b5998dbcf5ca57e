//! Tools served by this binary
//!
//! `add` and `calculate` are pure arithmetic, `get_weather` delegates to a
//! [`WeatherProvider`], and `server_status` reports process metadata.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::{
    domain::{
        expression::{evaluate, ExpressionError},
        utils::{format_number, ServerInfo},
    },
    errors::HandlerError,
    protocol::Content,
    registry::{CallContext, ToolDefinition, ToolHandler},
    schema::{FieldSpec, Schema, SchemaError, ValidatedArgs},
    weather_client::WeatherProvider,
};

pub const MAX_FORECAST_DAYS: u8 = 7;

#[derive(Debug, Deserialize)]
struct AddParams {
    a: f64,
    b: f64,
}

#[derive(Debug, Deserialize)]
struct CalculateParams {
    expression: String,
}

#[derive(Debug, Deserialize)]
struct WeatherParams {
    city: String,
    days: u8,
}

fn params<T: serde::de::DeserializeOwned>(args: &ValidatedArgs) -> Result<T, HandlerError> {
    args.deserialize().map_err(HandlerError::failed)
}

pub struct Add;

#[async_trait]
impl ToolHandler for Add {
    async fn call(&self, args: ValidatedArgs, _ctx: CallContext) -> Result<Vec<Content>, HandlerError> {
        let AddParams { a, b } = params::<AddParams>(&args)?;
        let sum = a + b;
        if !sum.is_finite() {
            return Err(HandlerError::rejected(format!(
                "invalid sum: {}",
                ExpressionError::NotFinite
            )));
        }
        Ok(vec![Content::text(format_number(sum))])
    }
}

pub fn add_tool() -> Result<ToolDefinition, SchemaError> {
    let schema = Schema::new([
        ("a", FieldSpec::number().required().describe("First addend")),
        ("b", FieldSpec::number().required().describe("Second addend")),
    ])?;
    Ok(ToolDefinition::new("add", "Add two numbers", schema, Add))
}

pub struct Calculate;

#[async_trait]
impl ToolHandler for Calculate {
    async fn call(&self, args: ValidatedArgs, _ctx: CallContext) -> Result<Vec<Content>, HandlerError> {
        let CalculateParams { expression } = params::<CalculateParams>(&args)?;
        let value = evaluate(&expression)
            .map_err(|err| HandlerError::rejected(format!("invalid expression: {err}")))?;
        Ok(vec![Content::text(format_number(value))])
    }
}

pub fn calculate_tool() -> Result<ToolDefinition, SchemaError> {
    let schema = Schema::new([(
        "expression",
        FieldSpec::string()
            .required()
            .describe("Arithmetic expression, e.g. `2+3 * 4`"),
    )])?;
    Ok(ToolDefinition::new(
        "calculate",
        "Evaluate an arithmetic expression with + - * / and parentheses",
        schema,
        Calculate,
    ))
}

pub struct GetWeather {
    provider: Arc<dyn WeatherProvider>,
}

impl GetWeather {
    pub fn new(provider: Arc<dyn WeatherProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl ToolHandler for GetWeather {
    async fn call(&self, args: ValidatedArgs, ctx: CallContext) -> Result<Vec<Content>, HandlerError> {
        let WeatherParams { city, days } = params::<WeatherParams>(&args)?;
        let report = self.provider.forecast(&city, days).await.map_err(|err| {
            warn!(request_id = %ctx.request_id, city = %city, error = %err, "weather lookup failed");
            HandlerError::rejected("weather service unavailable")
        })?;

        let payload = serde_json::to_value(&report).map_err(HandlerError::failed)?;
        Ok(vec![Content::json(&payload)])
    }
}

pub fn weather_tool(provider: Arc<dyn WeatherProvider>) -> Result<ToolDefinition, SchemaError> {
    let schema = Schema::new([
        ("city", FieldSpec::string().required().describe("City name")),
        (
            "days",
            FieldSpec::integer()
                .default_value(1)
                .min(1.0)
                .max(f64::from(MAX_FORECAST_DAYS))
                .describe("Number of forecast days"),
        ),
    ])?;
    Ok(ToolDefinition::new(
        "get_weather",
        "Get the weather forecast for a city",
        schema,
        GetWeather::new(provider),
    ))
}

pub struct ServerStatus {
    info: ServerInfo,
}

#[async_trait]
impl ToolHandler for ServerStatus {
    async fn call(&self, args: ValidatedArgs, ctx: CallContext) -> Result<Vec<Content>, HandlerError> {
        let verbose = args.boolean("verbose").unwrap_or_default();
        let mut snapshot = self.info.snapshot(Utc::now());
        snapshot["tools"] = json!(ctx.catalog.tool_names().collect::<Vec<_>>());
        if verbose {
            snapshot["capabilities"] =
                serde_json::to_value(ctx.catalog.as_ref()).map_err(HandlerError::failed)?;
        }
        if let Some(subject) = ctx.identity.and_then(|identity| identity.subject) {
            snapshot["caller"] = json!(subject);
        }
        Ok(vec![Content::json(&snapshot)])
    }
}

pub fn status_tool(info: ServerInfo) -> Result<ToolDefinition, SchemaError> {
    let schema = Schema::new([(
        "verbose",
        FieldSpec::boolean()
            .default_value(false)
            .describe("Also list every tool argument and resource"),
    )])?;
    Ok(ToolDefinition::new(
        "server_status",
        "Report server name, version, uptime and registered capabilities",
        schema,
        ServerStatus { info },
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::{json, Value};

    use super::*;
    use crate::{
        domain::resources::greeting_resource,
        protocol::{Identity, RequestId},
        registry::{Catalog, ResourceRegistry, ToolRegistry},
        weather_client::{DailyForecast, WeatherError, WeatherReport},
    };

    fn ctx() -> CallContext {
        CallContext::new(1)
    }

    async fn call(definition: &ToolDefinition, arguments: Value) -> Result<Vec<Content>, HandlerError> {
        let args = definition
            .input_schema()
            .validate(&arguments)
            .expect("arguments should validate");
        definition.handler().call(args, ctx()).await
    }

    fn single_text(content: Vec<Content>) -> String {
        match content.as_slice() {
            [Content::Text { text }] => text.clone(),
            other => panic!("expected a single text item, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn add_formats_integral_sums_without_fraction() {
        let tool = add_tool().expect("tool");

        let text = single_text(call(&tool, json!({"a": 2, "b": 3})).await.expect("sum"));
        assert_eq!(text, "5");

        let text = single_text(call(&tool, json!({"a": 0.1, "b": 0.2})).await.expect("sum"));
        assert_eq!(text, (0.1_f64 + 0.2).to_string());
    }

    #[tokio::test]
    async fn calculate_evaluates_and_rejects_bad_expressions() {
        let tool = calculate_tool().expect("tool");

        let text = single_text(
            call(&tool, json!({"expression": "3 + (12.5 * 4 - 10)/2"}))
                .await
                .expect("result"),
        );
        assert_eq!(text, "23");

        let error = call(&tool, json!({"expression": "1 / 0"}))
            .await
            .expect_err("division by zero");
        assert_eq!(error.public_message(), "invalid expression: division by zero");

        let error = call(&tool, json!({"expression": "require('fs')"}))
            .await
            .expect_err("not arithmetic");
        assert!(matches!(error, HandlerError::Rejected(_)));
    }

    struct FakeWeather {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl WeatherProvider for FakeWeather {
        async fn forecast(&self, city: &str, days: u8) -> Result<WeatherReport, WeatherError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(WeatherError::Status(503));
            }
            Ok(WeatherReport {
                location: city.to_string(),
                current_temp: 21.0,
                forecast: (0..days)
                    .map(|day| DailyForecast {
                        date: format!("2026-10-{:02}", 18 + u32::from(day)),
                        max_temp: 24.0,
                        min_temp: 12.0,
                        condition: "Sunny".to_string(),
                    })
                    .collect(),
            })
        }
    }

    fn fake_weather(fail: bool) -> Arc<FakeWeather> {
        Arc::new(FakeWeather {
            calls: AtomicUsize::new(0),
            fail,
        })
    }

    #[tokio::test]
    async fn weather_defaults_to_one_day() {
        let provider = fake_weather(false);
        let tool = weather_tool(provider.clone()).expect("tool");

        let text = single_text(call(&tool, json!({"city": "Beijing"})).await.expect("report"));
        let report: Value = serde_json::from_str(&text).expect("json text");

        assert_eq!(report["location"], json!("Beijing"));
        assert_eq!(report["current_temp"], json!(21.0));
        assert_eq!(report["forecast"].as_array().map(Vec::len), Some(1));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn weather_days_are_bounded_by_schema() {
        let tool = weather_tool(fake_weather(false)).expect("tool");

        for days in [0, 8] {
            assert!(tool
                .input_schema()
                .validate(&json!({"city": "Beijing", "days": days}))
                .is_err());
        }
        assert!(tool
            .input_schema()
            .validate(&json!({"city": "Beijing", "days": 7}))
            .is_ok());
    }

    #[tokio::test]
    async fn weather_failures_are_reported_generically() {
        let tool = weather_tool(fake_weather(true)).expect("tool");

        let error = call(&tool, json!({"city": "Atlantis", "days": 2}))
            .await
            .expect_err("provider failure");
        assert_eq!(error.public_message(), "weather service unavailable");
    }

    #[tokio::test]
    async fn weather_accepts_whole_float_days() {
        let provider = fake_weather(false);
        let tool = weather_tool(provider.clone()).expect("tool");

        let text = single_text(
            call(&tool, json!({"city": "Oslo", "days": 3.0}))
                .await
                .expect("3.0 days is a valid request"),
        );
        let report: Value = serde_json::from_str(&text).expect("json text");

        assert_eq!(report["forecast"].as_array().map(Vec::len), Some(3));
    }

    #[tokio::test]
    async fn add_rejects_overflowing_sums() {
        let tool = add_tool().expect("tool");

        let error = call(&tool, json!({"a": 1e308, "b": 1e308}))
            .await
            .expect_err("sum overflows to infinity");

        assert!(matches!(error, HandlerError::Rejected(_)));
        assert_eq!(error.public_message(), "invalid sum: result is not a finite number");
    }

    fn catalog() -> Arc<Catalog> {
        let mut tools = ToolRegistry::new();
        tools.register(add_tool().expect("tool")).expect("registration");
        tools
            .register(status_tool(ServerInfo::default()).expect("tool"))
            .expect("registration");
        let mut resources = ResourceRegistry::new();
        resources
            .register(greeting_resource().expect("resource"))
            .expect("registration");
        Arc::new(Catalog::collect(&tools, &resources))
    }

    #[tokio::test]
    async fn status_includes_caller_subject_and_tool_names() {
        let tool = status_tool(ServerInfo::default()).expect("tool");
        let args = tool.input_schema().validate(&json!({})).expect("empty args");
        let ctx = CallContext {
            identity: Some(Identity {
                subject: Some("alice".to_string()),
                claims: json!({"sub": "alice"}),
            }),
            catalog: catalog(),
            ..CallContext::new(RequestId::Integer(1))
        };

        let text = single_text(tool.handler().call(args, ctx).await.expect("status"));
        let status: Value = serde_json::from_str(&text).expect("json text");

        assert_eq!(status["caller"], json!("alice"));
        assert_eq!(status["version"], json!(env!("CARGO_PKG_VERSION")));
        assert_eq!(status["tools"], json!(["add", "server_status"]));
        assert!(status.get("capabilities").is_none());
    }

    #[tokio::test]
    async fn verbose_status_describes_arguments_and_resources() {
        let tool = status_tool(ServerInfo::default()).expect("tool");
        let args = tool
            .input_schema()
            .validate(&json!({"verbose": true}))
            .expect("verbose flag");
        let ctx = CallContext {
            catalog: catalog(),
            ..CallContext::new(1)
        };

        let text = single_text(tool.handler().call(args, ctx).await.expect("status"));
        let status: Value = serde_json::from_str(&text).expect("json text");
        let capabilities = &status["capabilities"];

        assert_eq!(capabilities["tools"][0]["arguments"][0]["name"], json!("a"));
        assert_eq!(capabilities["tools"][0]["arguments"][0]["type"], json!("number"));
        assert_eq!(
            capabilities["tools"][0]["arguments"][0]["description"],
            json!("First addend")
        );
        assert_eq!(capabilities["resources"][0]["pattern"], json!("greeting://{name}"));
        assert_eq!(capabilities["resources"][0]["template"], json!(true));
        assert_eq!(
            capabilities["resources"][0]["description"],
            json!("A personal greeting")
        );
    }
}
