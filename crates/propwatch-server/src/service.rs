use chrono::Utc;
use propwatch_alert::{preview, validate_rule, AlertError, RulePreview};
use propwatch_common::id::next_id;
use propwatch_common::types::{AlertRule, ChannelType, MessageTemplate};
use propwatch_notify::template::{render, sample_bindings_with, validate_template};
use propwatch_notify::{Bindings, Dispatcher, NotifyError, RenderedMessage};
use propwatch_storage::{RuleStore, TemplateStore};
use std::sync::Arc;

/// Rule authoring on top of a [`RuleStore`].
pub struct RuleService {
    rules: Arc<dyn RuleStore>,
}

impl RuleService {
    pub fn new(rules: Arc<dyn RuleStore>) -> Self {
        Self { rules }
    }

    /// Validates and persists `rule`.
    ///
    /// A rule without an id is created with a fresh one; an existing rule
    /// keeps its original `created_at`.
    pub fn save_rule(&self, mut rule: AlertRule) -> propwatch_alert::Result<AlertRule> {
        validate_rule(&rule)?;

        let now = Utc::now();
        let existing = if rule.id.is_empty() {
            rule.id = next_id();
            None
        } else {
            self.rules.get_rule(&rule.id)?
        };
        rule.created_at = existing.map_or(now, |r| r.created_at);
        rule.updated_at = now;

        self.rules.upsert_rule(&rule)?;
        tracing::info!(rule_id = %rule.id, rule = %rule.name, "Alert rule saved");
        Ok(rule)
    }

    /// Removes the rule. Instances it produced are kept.
    pub fn delete_rule(&self, rule_id: &str) -> propwatch_alert::Result<()> {
        if !self.rules.delete_rule(rule_id)? {
            return Err(AlertError::NotFound {
                entity: "alert_rule",
                id: rule_id.to_string(),
            });
        }
        tracing::info!(rule_id, "Alert rule deleted");
        Ok(())
    }

    /// Stops or resumes scheduled evaluation. Open instances are untouched.
    pub fn set_rule_active(&self, rule_id: &str, active: bool) -> propwatch_alert::Result<AlertRule> {
        let mut rule = self.get_rule(rule_id)?;
        if rule.active != active {
            rule.active = active;
            rule.updated_at = Utc::now();
            self.rules.upsert_rule(&rule)?;
            tracing::info!(rule_id, active, "Alert rule activation changed");
        }
        Ok(rule)
    }

    pub fn get_rule(&self, rule_id: &str) -> propwatch_alert::Result<AlertRule> {
        self.rules
            .get_rule(rule_id)?
            .ok_or_else(|| AlertError::NotFound {
                entity: "alert_rule",
                id: rule_id.to_string(),
            })
    }

    pub fn list_rules(&self) -> propwatch_alert::Result<Vec<AlertRule>> {
        Ok(self.rules.list_rules()?)
    }

    pub fn preview_rule(&self, rule: &AlertRule, sample_value: f64) -> RulePreview {
        preview(rule, sample_value)
    }
}

/// Template authoring, previews and test sends.
pub struct TemplateService {
    templates: Arc<dyn TemplateStore>,
    dispatcher: Arc<Dispatcher>,
}

impl TemplateService {
    pub fn new(templates: Arc<dyn TemplateStore>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            templates,
            dispatcher,
        }
    }

    /// Validates and persists `template`; see [`RuleService::save_rule`] for
    /// id and timestamp handling.
    pub fn save_template(&self, mut template: MessageTemplate) -> propwatch_notify::Result<MessageTemplate> {
        validate_template(&template)?;

        let now = Utc::now();
        let existing = if template.id.is_empty() {
            template.id = next_id();
            None
        } else {
            self.templates.get_template(&template.id)?
        };
        template.created_at = existing.map_or(now, |t| t.created_at);
        template.updated_at = now;
        if !template.channel_type.supports_subject() {
            template.subject = None;
        }

        self.templates.upsert_template(&template)?;
        tracing::info!(
            template_id = %template.id,
            channel = %template.channel_type,
            "Message template saved"
        );
        Ok(template)
    }

    pub fn get_template(&self, template_id: &str) -> propwatch_notify::Result<MessageTemplate> {
        self.templates
            .get_template(template_id)?
            .ok_or_else(|| NotifyError::NotFound {
                entity: "message_template",
                id: template_id.to_string(),
            })
    }

    pub fn list_templates(
        &self,
        channel: Option<ChannelType>,
    ) -> propwatch_notify::Result<Vec<MessageTemplate>> {
        Ok(self.templates.list_templates(channel)?)
    }

    /// Removes the template. Delivery logs that reference it are kept.
    pub fn delete_template(&self, template_id: &str) -> propwatch_notify::Result<()> {
        if !self.templates.delete_template(template_id)? {
            return Err(NotifyError::NotFound {
                entity: "message_template",
                id: template_id.to_string(),
            });
        }
        tracing::info!(template_id, "Message template deleted");
        Ok(())
    }

    /// Renders `template` against the sample bindings with `overrides`
    /// applied on top.
    pub fn preview_template(&self, template: &MessageTemplate, overrides: &Bindings) -> RenderedMessage {
        render(template, &sample_bindings_with(overrides))
    }

    /// Sends the stored template once to `recipient`. The log is tagged as a
    /// test and kept out of statistics.
    pub async fn test_delivery(
        &self,
        template_id: &str,
        recipient: &str,
        overrides: &Bindings,
    ) -> propwatch_notify::Result<bool> {
        let template = self.get_template(template_id)?;
        self.dispatcher
            .send_test(&template, recipient, &sample_bindings_with(overrides))
            .await
    }
}
