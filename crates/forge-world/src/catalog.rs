//! Server-side script catalog
//!
//! The simulator exposes its control surface as a catalog of named server
//! scripts. The client holds templates for the scripts it relies on,
//! renders them with positional arguments, and verifies at initialization
//! that the server actually advertises every one of them. A stale
//! advertisement gets one reload nudge before the mismatch becomes fatal.

use crate::error::WorldError;
use forge_protocol::{decode, Decoded, Transport, Value, RAW_PREFIX};
use indexmap::IndexMap;

/// One client-side script template. `{0}`, `{1}`, ... are positional
/// argument slots filled with wire-rendered values.
#[derive(Debug, Clone)]
pub struct ScriptTemplate {
    pub body: String,
    pub arity: usize,
}

/// The set of server scripts this client depends on.
#[derive(Debug, Clone)]
pub struct ScriptCatalog {
    templates: IndexMap<String, ScriptTemplate>,
}

impl ScriptCatalog {
    /// The standard control surface: inventory, entities, research, the
    /// world clock, telemetry, and agent placement.
    #[must_use]
    pub fn standard() -> Self {
        let mut templates = IndexMap::new();
        let mut add = |name: &str, body: &str, arity: usize| {
            templates.insert(
                name.to_string(),
                ScriptTemplate {
                    body: body.to_string(),
                    arity,
                },
            );
        };
        add("inventory.get", "inventory.get()", 0);
        add("inventory.set", "inventory.set({0})", 1);
        add("inventory.clear", "inventory.clear()", 0);
        add("entities.get", "entities.get()", 0);
        add("entities.load", "entities.load({0})", 1);
        add("entities.clear", "entities.clear()", 0);
        add("research.get", "research.get()", 0);
        add("research.set", "research.set({0})", 1);
        add("clock.get", "clock.get()", 0);
        add("clock.set", "clock.set({0})", 1);
        add("clock.advance", "clock.advance({0})", 1);
        add("stats.get", "stats.get()", 0);
        add("agent.home", "agent.home()", 0);
        Self { templates }
    }

    /// Names of every script this catalog requires the server to have.
    pub fn required(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Render one script invocation with wire-encoded arguments.
    pub fn render(&self, name: &str, args: &[Value]) -> Result<String, WorldError> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| WorldError::UnknownScript(name.to_string()))?;
        if args.len() != template.arity {
            return Err(WorldError::ScriptArity {
                name: name.to_string(),
                expected: template.arity,
                got: args.len(),
            });
        }
        let mut rendered = template.body.clone();
        for (i, arg) in args.iter().enumerate() {
            rendered = rendered.replace(&format!("{{{i}}}"), &arg.to_wire());
        }
        Ok(rendered)
    }

    /// Verify the server advertises every required script.
    ///
    /// Fetches the advertised list; if anything is missing, asks the
    /// server to reload its catalog once and re-checks before giving up.
    pub async fn verify(&self, transport: &mut dyn Transport) -> Result<(), WorldError> {
        let missing = self.missing_from(transport).await?;
        if missing.is_empty() {
            return Ok(());
        }
        tracing::warn!(?missing, "catalog incomplete, requesting reload");
        transport
            .send(&format!("{RAW_PREFIX}catalog.reload()"))
            .await?;
        let missing = self.missing_from(transport).await?;
        if missing.is_empty() {
            Ok(())
        } else {
            Err(WorldError::CatalogMismatch { missing })
        }
    }

    async fn missing_from(
        &self,
        transport: &mut dyn Transport,
    ) -> Result<Vec<String>, WorldError> {
        let raw = transport
            .send(&format!("{RAW_PREFIX}catalog.list()"))
            .await?;
        let advertised = match decode(&raw) {
            Decoded::Value(Value::Seq(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect::<Vec<_>>(),
            Decoded::Value(Value::Table(entries)) if entries.is_empty() => Vec::new(),
            other => {
                return Err(WorldError::Decode {
                    command: "catalog.list()".to_string(),
                    reason: format!("expected a sequence of script names, got {other:?}"),
                })
            }
        };
        Ok(self
            .required()
            .filter(|name| !advertised.iter().any(|a| a == name))
            .map(str::to_string)
            .collect())
    }
}
