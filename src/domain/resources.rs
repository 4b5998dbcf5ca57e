//! Resources served by this binary: `greeting://{name}` and `status://server`.

use async_trait::async_trait;
use chrono::Utc;

use crate::{
    domain::utils::ServerInfo,
    errors::HandlerError,
    registry::{CallContext, Placeholders, RegistryError, ResourceDefinition, ResourceResolver},
};

pub struct Greeting;

#[async_trait]
impl ResourceResolver for Greeting {
    async fn read(
        &self,
        _uri: &str,
        placeholders: Placeholders,
        _ctx: CallContext,
    ) -> Result<String, HandlerError> {
        let name = placeholders
            .get("name")
            .ok_or_else(|| HandlerError::failed("greeting pattern lost its `name` placeholder"))?;
        Ok(format!("Hello, {name}!"))
    }
}

pub fn greeting_resource() -> Result<ResourceDefinition, RegistryError> {
    Ok(ResourceDefinition::new("greeting://{name}", "greeting", Greeting)?
        .with_description("A personal greeting")
        .with_mime_type("text/plain"))
}

pub struct StatusResource {
    info: ServerInfo,
}

#[async_trait]
impl ResourceResolver for StatusResource {
    async fn read(
        &self,
        _uri: &str,
        _placeholders: Placeholders,
        _ctx: CallContext,
    ) -> Result<String, HandlerError> {
        serde_json::to_string_pretty(&self.info.snapshot(Utc::now())).map_err(HandlerError::failed)
    }
}

pub fn status_resource(info: ServerInfo) -> Result<ResourceDefinition, RegistryError> {
    Ok(
        ResourceDefinition::new("status://server", "server_status", StatusResource { info })?
            .with_description("Server name, version and uptime")
            .with_mime_type("application/json"),
    )
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::registry::ResourceRegistry;

    fn ctx() -> CallContext {
        CallContext::new(1)
    }

    #[tokio::test]
    async fn greeting_uses_the_captured_name() {
        let mut registry = ResourceRegistry::new();
        registry
            .register(greeting_resource().expect("resource"))
            .expect("registration");

        let (placeholders, definition) = registry.resolve("greeting://Ada").expect("match");
        let text = definition
            .resolver()
            .read("greeting://Ada", placeholders, ctx())
            .await
            .expect("read");

        assert_eq!(text, "Hello, Ada!");
        assert_eq!(definition.mime_type(), Some("text/plain"));
    }

    #[tokio::test]
    async fn status_resource_is_json() {
        let definition = status_resource(ServerInfo::default()).expect("resource");

        let text = definition
            .resolver()
            .read("status://server", Placeholders::new(), ctx())
            .await
            .expect("read");
        let status: Value = serde_json::from_str(&text).expect("json");

        assert_eq!(status["name"], Value::from(env!("CARGO_PKG_NAME")));
        assert!(status["uptime_seconds"].is_i64());
    }
}
