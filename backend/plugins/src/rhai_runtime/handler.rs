use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use parley_core::{Capabilities, ConfigValue, Conversation};
use rhai::{AST, Dynamic, Engine, FnPtr};
use serde_json::Value;

use super::convert::{dynamic_to_json, json_to_dynamic};
use crate::handler::HookHandler;

/// A hook defined in a plugin script. Holds the AST it was compiled into so
/// script functions referenced by the pointer stay callable.
pub struct RhaiHandler {
    engine: Arc<Engine>,
    ast: Arc<AST>,
    fn_ptr: FnPtr,
}

impl RhaiHandler {
    pub fn new(engine: Arc<Engine>, ast: Arc<AST>, fn_ptr: FnPtr) -> Self {
        Self { engine, ast, fn_ptr }
    }
}

#[async_trait]
impl HookHandler for RhaiHandler {
    fn name(&self) -> &str {
        self.fn_ptr.fn_name()
    }

    async fn call(
        &self,
        conversation: Conversation,
        config: &ConfigValue,
        caps: &Capabilities,
    ) -> Result<Conversation> {
        let chat = serde_json::to_value(&conversation)?;
        let config = Value::Object(config.clone());
        let caps = serde_json::to_value(caps)?;

        let engine = Arc::clone(&self.engine);
        let ast = Arc::clone(&self.ast);
        let fn_ptr = self.fn_ptr.clone();

        // Script execution is CPU-bound and bounded by the sandbox's
        // operation limit; keep it off the async workers.
        let returned = tokio::task::spawn_blocking(move || {
            let args = (json_to_dynamic(&chat), json_to_dynamic(&config), json_to_dynamic(&caps));
            fn_ptr
                .call::<Dynamic>(&engine, &ast, args)
                .map(|value| dynamic_to_json(&value))
                .map_err(|e| anyhow!("{e}"))
        })
        .await
        .context("hook task panicked")??;

        serde_json::from_value::<Conversation>(returned)
            .map_err(|e| anyhow!("hook returned a malformed conversation: {e}"))
    }
}
