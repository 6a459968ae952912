//! Console output for `--check-config`
//!
//! Renders the expanded probe plan, the configuration sources and any
//! validation warnings as a plain or colored text report.

use crate::{
    config::{display_config_summary, LoadedConfig},
    error::Result,
    models::ProbeSpec,
};
use colored::*;
use std::fmt::Write as _;

/// Color scheme for the plan report
#[derive(Debug, Clone)]
pub struct ColorScheme {
    pub header: Color,
    pub success: Color,
    pub muted: Color,
}

impl Default for ColorScheme {
    fn default() -> Self {
        Self {
            header: Color::Cyan,
            success: Color::Green,
            muted: Color::BrightBlack,
        }
    }
}

/// Formats a loaded configuration as a probe plan
pub struct PlanFormatter {
    enable_color: bool,
    color_scheme: ColorScheme,
}

impl PlanFormatter {
    pub fn new(enable_color: bool) -> Self {
        Self {
            enable_color,
            color_scheme: ColorScheme::default(),
        }
    }

    /// Apply color to text if colors are enabled
    fn colorize(&self, text: &str, color: Color) -> ColoredString {
        if self.enable_color {
            text.color(color)
        } else {
            text.normal()
        }
    }

    fn section_header(&self, title: &str) -> String {
        if self.enable_color {
            title.bold().color(self.color_scheme.header).to_string()
        } else {
            title.to_string()
        }
    }

    /// Table of one row per probe spec
    fn format_probe_table(&self, specs: &[ProbeSpec]) -> Result<String> {
        if specs.is_empty() {
            return Ok(format!(
                "  {}\n",
                self.colorize("No probes configured", self.color_scheme.muted)
            ));
        }

        let variant_width = specs
            .iter()
            .map(|spec| spec.variant.as_str().len())
            .max()
            .unwrap_or(0)
            .max("VARIANT".len());
        let label_width = specs
            .iter()
            .map(|spec| spec.label().len())
            .max()
            .unwrap_or(0)
            .max("DESTINATION".len());

        let mut output = String::new();
        writeln!(
            output,
            "  {:<vw$}  {:<lw$}  {}",
            "VARIANT",
            "DESTINATION",
            "TARGET",
            vw = variant_width,
            lw = label_width
        )?;

        for spec in specs {
            writeln!(
                output,
                "  {:<vw$}  {:<lw$}  {}",
                spec.variant.as_str(),
                spec.label(),
                self.colorize(&spec.target(), self.color_scheme.muted),
                vw = variant_width,
                lw = label_width
            )?;
        }

        Ok(output)
    }

    /// Full `--check-config` report
    pub fn format_plan(&self, loaded: &LoadedConfig) -> Result<String> {
        let specs = loaded.config.probe_specs()?;
        let mut output = String::new();

        writeln!(output, "{}", self.section_header("Configuration"))?;
        for line in display_config_summary(&loaded.config).lines() {
            writeln!(output, "  {}", line)?;
        }
        writeln!(output, "  Sources: {}", loaded.sources.join(" < "))?;
        writeln!(output)?;

        writeln!(output, "{} ({})", self.section_header("Probe plan"), specs.len())?;
        output.push_str(&self.format_probe_table(&specs)?);

        if !loaded.warnings.is_empty() {
            writeln!(output)?;
            writeln!(output, "{}", self.section_header("Warnings"))?;
            for warning in &loaded.warnings {
                writeln!(output, "  {}", warning.format(self.enable_color))?;
            }
        }

        writeln!(output)?;
        writeln!(
            output,
            "{}",
            self.colorize("Configuration is valid", self.color_scheme.success)
        )?;

        Ok(output)
    }
}
