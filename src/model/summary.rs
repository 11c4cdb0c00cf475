//! Layer-by-layer description of a built model

use serde::{Deserialize, Serialize};
use std::fmt;

/// One row of a model summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSummary {
    /// Unique layer name
    pub name: String,
    /// Layer type with its key hyperparameters
    pub kind: String,
    /// Output shape without the batch axis
    pub output_shape: Vec<usize>,
    /// Parameter count
    pub params: usize,
}

impl LayerSummary {
    pub fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
        output_shape: Vec<usize>,
        params: usize,
    ) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            output_shape,
            params,
        }
    }
}

/// Summary of a whole model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSummary {
    /// Model name
    pub name: String,
    /// Input shape without the batch axis
    pub input_shape: Vec<usize>,
    /// Layers in evaluation order
    pub layers: Vec<LayerSummary>,
}

impl ModelSummary {
    pub fn new(name: impl Into<String>, input_shape: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            input_shape,
            layers: Vec::new(),
        }
    }

    /// Append a layer
    pub fn push(&mut self, layer: LayerSummary) {
        self.layers.push(layer);
    }

    /// Output shape of the last layer
    pub fn output_shape(&self) -> &[usize] {
        self.layers
            .last()
            .map(|l| l.output_shape.as_slice())
            .unwrap_or(&self.input_shape)
    }

    /// Total parameter count
    pub fn total_params(&self) -> usize {
        self.layers.iter().map(|l| l.params).sum()
    }

    /// Look up a layer by name
    pub fn layer(&self, name: &str) -> Option<&LayerSummary> {
        self.layers.iter().find(|l| l.name == name)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn format_shape(shape: &[usize]) -> String {
    let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
    format!("(None, {})", dims.join(", "))
}

impl fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(96);
        writeln!(f, "Model: \"{}\"", self.name)?;
        writeln!(f, "{}", rule)?;
        writeln!(
            f,
            "{:<22} {:<44} {:<18} {:>9}",
            "Layer", "Type", "Output Shape", "Params"
        )?;
        writeln!(f, "{}", "-".repeat(96))?;
        writeln!(
            f,
            "{:<22} {:<44} {:<18} {:>9}",
            "input",
            "Input",
            format_shape(&self.input_shape),
            0
        )?;
        for layer in &self.layers {
            writeln!(
                f,
                "{:<22} {:<44} {:<18} {:>9}",
                layer.name,
                layer.kind,
                format_shape(&layer.output_shape),
                layer.params
            )?;
        }
        writeln!(f, "{}", rule)?;
        write!(f, "Total params: {}", self.total_params())
    }
}
