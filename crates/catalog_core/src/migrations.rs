//! Built-in catalog migrations.

use crate::error::CoreResult;
use crate::migration::{Migration, MigrationContext, MigrationManager, MigrationVersion};
use crate::product::CREATED;
use async_trait::async_trait;
use serde_json::json;

/// Maps `created` as a date so products can be sorted and ranged by age.
#[derive(Debug, Default)]
pub struct CreatedDateMapping;

#[async_trait]
impl Migration for CreatedDateMapping {
    fn version(&self) -> MigrationVersion {
        1
    }

    fn name(&self) -> &str {
        "created_date_mapping"
    }

    fn description(&self) -> Option<&str> {
        Some("map created as a date field")
    }

    async fn up(&self, ctx: &MigrationContext) -> CoreResult<()> {
        ctx.put_mapping(json!({
            "properties": {
                CREATED: { "type": "date" }
            }
        }))
        .await
    }
}

/// Maps string attributes as `keyword` so they can be aggregated.
#[derive(Debug, Default)]
pub struct KeywordAttributes;

#[async_trait]
impl Migration for KeywordAttributes {
    fn version(&self) -> MigrationVersion {
        2
    }

    fn name(&self) -> &str {
        "keyword_attributes"
    }

    fn description(&self) -> Option<&str> {
        Some("dynamic template mapping string attributes to keyword")
    }

    async fn up(&self, ctx: &MigrationContext) -> CoreResult<()> {
        ctx.put_mapping(json!({
            "dynamic_templates": [
                {
                    "attributes_as_keywords": {
                        "match_mapping_type": "string",
                        "mapping": { "type": "keyword" }
                    }
                }
            ]
        }))
        .await
    }
}

impl MigrationManager {
    /// Creates a manager holding the built-in migrations.
    pub fn builtin() -> Self {
        let mut manager = Self::new();
        for migration in builtin_migrations() {
            // Built-in versions are distinct constants.
            let _ = manager.register(migration);
        }
        manager
    }
}

/// The built-in migrations, in version order.
pub fn builtin_migrations() -> Vec<Box<dyn Migration>> {
    vec![Box::new(CreatedDateMapping), Box::new(KeywordAttributes)]
}
