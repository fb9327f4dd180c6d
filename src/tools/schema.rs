//! JSON Schema contracts for tool inputs and outputs.

use jsonschema::Validator;
use serde_json::Value;

/// A compiled schema, checked once at registration.
pub struct SchemaContract {
    schema: Value,
    validator: Validator,
}

impl SchemaContract {
    /// Compile `schema`. Returns the compiler's message if the schema itself is invalid.
    pub fn compile(schema: Value) -> Result<Self, String> {
        let validator = Validator::new(&schema).map_err(|e| e.to_string())?;
        Ok(Self { schema, validator })
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// Validate `value`, reporting every violation.
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        if self.validator.is_valid(value) {
            return Ok(());
        }
        let errors: Vec<String> = self
            .validator
            .iter_errors(value)
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{}: {}", path, e)
                }
            })
            .collect();
        Err(errors.join("; "))
    }
}

impl std::fmt::Debug for SchemaContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaContract")
            .field("schema", &self.schema)
            .finish()
    }
}
