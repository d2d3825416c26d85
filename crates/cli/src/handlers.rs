// Built-in step handlers and model for running workflows locally

use anyhow::{anyhow, Context, Result};
use flowtree_core::workflow::{HandlerRegistry, StepHandler};
use flowtree_core::{ModelHandle, OrgId, State, StepKind, TextModel};
use serde_json::Value;
use std::sync::Arc;

/// Registry holding every built-in handler
pub fn builtin_registry() -> Result<HandlerRegistry> {
    let handlers: Vec<Arc<dyn StepHandler>> = vec![
        Arc::new(ManualTrigger),
        Arc::new(StaticFields),
        Arc::new(PromptStep),
    ];
    HandlerRegistry::from_handlers(handlers).context("Failed to register built-in handlers")
}

/// Model that answers every prompt with the prompt itself
pub struct EchoModel;

#[async_trait::async_trait]
impl TextModel for EchoModel {
    fn name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        Ok(prompt.to_string())
    }
}

/// `TRIGGER/manual`: starts a run, contributes nothing
pub struct ManualTrigger;

#[async_trait::async_trait]
impl StepHandler for ManualTrigger {
    fn kind(&self) -> StepKind {
        StepKind::Trigger
    }

    fn identifier(&self) -> &str {
        "manual"
    }

    async fn process(
        &self,
        _config: &Value,
        _state: &State,
        _organization_id: &OrgId,
        _model: &ModelHandle,
    ) -> Result<State> {
        Ok(State::new())
    }
}

/// `THIRD_PARTY/static`: contributes the object under `config.fields`
pub struct StaticFields;

#[async_trait::async_trait]
impl StepHandler for StaticFields {
    fn kind(&self) -> StepKind {
        StepKind::ThirdParty
    }

    fn identifier(&self) -> &str {
        "static"
    }

    fn check_config(&self, config: &Value) -> Result<()> {
        match config.get("fields") {
            Some(Value::Object(_)) => Ok(()),
            Some(_) => Err(anyhow!("`fields` must be an object")),
            None => Err(anyhow!("missing `fields`")),
        }
    }

    async fn process(
        &self,
        config: &Value,
        _state: &State,
        _organization_id: &OrgId,
        _model: &ModelHandle,
    ) -> Result<State> {
        config
            .get("fields")
            .cloned()
            .and_then(State::from_value)
            .ok_or_else(|| anyhow!("`fields` must be an object"))
    }
}

/// `THIRD_PARTY/prompt`: renders `config.template` against the inherited
/// state and stores the model's completion under `prompt`
pub struct PromptStep;

#[async_trait::async_trait]
impl StepHandler for PromptStep {
    fn kind(&self) -> StepKind {
        StepKind::ThirdParty
    }

    fn identifier(&self) -> &str {
        "prompt"
    }

    fn check_config(&self, config: &Value) -> Result<()> {
        config
            .get("template")
            .and_then(Value::as_str)
            .map(|_| ())
            .ok_or_else(|| anyhow!("missing string `template`"))
    }

    async fn process(
        &self,
        config: &Value,
        state: &State,
        organization_id: &OrgId,
        model: &ModelHandle,
    ) -> Result<State> {
        let template = config
            .get("template")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("missing string `template`"))?;

        let rendered = render_template(template, state);
        tracing::debug!(org = %organization_id, model = model.name(), "Completing prompt");

        let completion = model
            .complete(&rendered)
            .await
            .context("Model completion failed")?;

        Ok(State::new().with("prompt", completion))
    }
}

/// Replace `{{field}}` placeholders with state values in one pass.
///
/// Strings are inserted bare, other values as JSON; unknown fields are left as
/// is. Inserted values are never scanned for placeholders themselves.
pub fn render_template(template: &str, state: &State) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        result.push_str(&rest[..open]);
        let after = &rest[open + 2..];

        let Some(close) = after.find("}}") else {
            result.push_str(&rest[open..]);
            return result;
        };

        match state.get(&after[..close]) {
            Some(Value::String(s)) => {
                result.push_str(s);
                rest = &after[close + 2..];
            }
            Some(other) => {
                result.push_str(&other.to_string());
                rest = &after[close + 2..];
            }
            None => {
                // keep the braces and rescan, an inner `{{` may still match
                result.push_str("{{");
                rest = after;
            }
        }
    }

    result.push_str(rest);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn model() -> ModelHandle {
        Arc::new(EchoModel)
    }

    #[test]
    fn test_render_template() {
        let state = State::new().with("topic", "sunsets").with("count", 3);
        assert_eq!(
            render_template("{{count}} photos of {{topic}} by {{author}}", &state),
            "3 photos of sunsets by {{author}}"
        );
    }

    #[test]
    fn test_render_template_does_not_expand_inserted_values() {
        let state = State::new()
            .with("title", "{{secret}} and {{title}}")
            .with("secret", "hunter2");
        assert_eq!(
            render_template("Title: {{title}}", &state),
            "Title: {{secret}} and {{title}}"
        );
        assert_eq!(
            render_template("{{a {{secret}} {{unclosed", &state),
            "{{a hunter2 {{unclosed"
        );
    }

    #[test]
    fn test_builtin_registry_contents() {
        let registry = builtin_registry().unwrap();
        assert_eq!(registry.len(), 3);
        assert!(registry.contains(StepKind::Trigger, "manual"));
        assert!(registry.contains(StepKind::ThirdParty, "static"));
        assert!(registry.contains(StepKind::ThirdParty, "prompt"));
    }

    #[tokio::test]
    async fn test_static_fields() {
        let config = json!({"fields": {"image_url": "http://x/1.png"}});
        assert!(StaticFields.check_config(&config).is_ok());
        assert!(StaticFields.check_config(&json!({"fields": 1})).is_err());

        let state = StaticFields
            .process(&config, &State::new(), &OrgId::new("acme"), &model())
            .await
            .unwrap();
        assert_eq!(state.get_str("image_url"), Some("http://x/1.png"));
    }

    #[tokio::test]
    async fn test_prompt_step_uses_inherited_state() {
        let config = json!({"template": "Write a caption about {{topic}}"});
        assert!(PromptStep.check_config(&config).is_ok());
        assert!(PromptStep.check_config(&json!({})).is_err());

        let inherited = State::new().with("topic", "sunsets");
        let state = PromptStep
            .process(&config, &inherited, &OrgId::new("acme"), &model())
            .await
            .unwrap();
        assert_eq!(state.get_str("prompt"), Some("Write a caption about sunsets"));
        assert_eq!(state.len(), 1);
    }
}
