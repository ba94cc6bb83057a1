use serde::{Deserialize, Serialize};

const NUMERIC_DTYPE: &str = "double";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub dtype: String,
}

impl ColumnSpec {
    fn numeric(name: Option<String>) -> Self {
        Self {
            name,
            dtype: NUMERIC_DTYPE.to_string(),
        }
    }
}

/// Input/output schema recorded next to a published artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSignature {
    pub inputs: Vec<ColumnSpec>,
    pub outputs: Vec<ColumnSpec>,
}

impl ModelSignature {
    /// Derives the schema from a sample and what the artifact actually
    /// predicted for it. Columns are named only when `names` matches the
    /// sample width.
    pub fn infer(sample: &[Vec<f64>], predictions: &[f64], names: Option<&[&str]>) -> Self {
        let width = sample.first().map(Vec::len).unwrap_or(0);
        let inputs = match names {
            Some(names) if names.len() == width => names
                .iter()
                .map(|name| ColumnSpec::numeric(Some((*name).to_string())))
                .collect(),
            _ => (0..width).map(|_| ColumnSpec::numeric(None)).collect(),
        };
        let outputs = if predictions.is_empty() {
            Vec::new()
        } else {
            vec![ColumnSpec::numeric(None)]
        };
        Self { inputs, outputs }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::ModelSignature;

    #[test]
    fn infer_names_columns_when_width_matches() -> anyhow::Result<()> {
        let sample = vec![vec![0.1, 0.2], vec![0.3, 0.4]];
        let signature = ModelSignature::infer(&sample, &[1.0, 0.0], Some(&["a", "b"]));
        assert_eq!(
            serde_json::to_value(&signature)?,
            json!({
                "inputs": [{"name": "a", "type": "double"}, {"name": "b", "type": "double"}],
                "outputs": [{"type": "double"}]
            })
        );
        Ok(())
    }

    #[test]
    fn infer_falls_back_to_unnamed_columns() {
        let sample = vec![vec![0.1, 0.2, 0.3]];
        let signature = ModelSignature::infer(&sample, &[0.5], Some(&["only-one"]));
        assert_eq!(signature.inputs.len(), 3);
        assert!(signature.inputs.iter().all(|column| column.name.is_none()));
        assert_eq!(signature.outputs.len(), 1);
    }
}
