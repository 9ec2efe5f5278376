//! Chart block embedded in Markdown answers.
//!
//! The front end looks for a fenced block tagged `chart` and renders the
//! JSON inside it.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ChartType {
    Bar,
    Line,
    Pie,
    Doughnut,
    HorizontalBar,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dataset {
    pub label: String,
    pub data: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChartOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stacked: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSpec {
    #[serde(rename = "type")]
    pub chart_type: ChartType,
    pub title: String,
    pub labels: Vec<String>,
    pub datasets: Vec<Dataset>,
    pub options: ChartOptions,
}

impl ChartSpec {
    pub fn new(chart_type: ChartType, title: impl Into<String>) -> Self {
        Self {
            chart_type,
            title: title.into(),
            labels: Vec::new(),
            datasets: Vec::new(),
            options: ChartOptions::default(),
        }
    }

    pub fn labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn dataset(mut self, label: impl Into<String>, data: Vec<f64>) -> Self {
        self.datasets.push(Dataset {
            label: label.into(),
            data,
        });
        self
    }

    pub fn currency(mut self) -> Self {
        self.options.currency = Some(true);
        self
    }

    pub fn percentage(mut self) -> Self {
        self.options.percentage = Some(true);
        self
    }

    pub fn stacked(mut self) -> Self {
        self.options.stacked = Some(true);
        self
    }

    /// Nothing worth drawing.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() || self.datasets.iter().all(|d| d.data.is_empty())
    }

    /// The fenced Markdown block, or an empty string for an empty chart.
    pub fn to_markdown(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        match serde_json::to_string(self) {
            Ok(json) => format!("```chart\n{}\n```\n", json),
            Err(_) => String::new(),
        }
    }
}
