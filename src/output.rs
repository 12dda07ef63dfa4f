//! Shared output formatting for sitevault CLI commands.

use serde::Serialize;

use crate::error::Result;

pub const SCHEMA_VERSION: &str = "sitevault.v1";

#[derive(Debug, Clone, Copy)]
pub struct OutputOptions {
    pub json: bool,
    pub quiet: bool,
}

#[derive(Debug, Clone)]
pub struct HumanOutput {
    header: String,
    summary: Vec<(String, String)>,
    details: Vec<String>,
    warnings: Vec<String>,
    next_steps: Vec<String>,
}

impl HumanOutput {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            summary: Vec::new(),
            details: Vec::new(),
            warnings: Vec::new(),
            next_steps: Vec::new(),
        }
    }

    pub fn push_summary(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.summary.push((key.into(), value.into()));
    }

    pub fn push_detail(&mut self, value: impl Into<String>) {
        self.details.push(value.into());
    }

    pub fn push_warning(&mut self, value: impl Into<String>) {
        self.warnings.push(value.into());
    }

    pub fn push_next_step(&mut self, value: impl Into<String>) {
        self.next_steps.push(value.into());
    }
}

pub fn emit_success<T: Serialize>(
    options: OutputOptions,
    command: &str,
    data: &T,
    human: Option<&HumanOutput>,
) -> Result<()> {
    if options.json {
        let warnings = human.map(|h| h.warnings.clone()).unwrap_or_default();
        let next_steps = human.map(|h| h.next_steps.clone()).unwrap_or_default();

        #[derive(Serialize)]
        struct Envelope<'a, T: Serialize> {
            schema_version: &'static str,
            command: &'a str,
            status: &'static str,
            data: &'a T,
            #[serde(skip_serializing_if = "Vec::is_empty")]
            warnings: Vec<String>,
            #[serde(skip_serializing_if = "Vec::is_empty")]
            next_steps: Vec<String>,
        }

        let payload = Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            status: "success",
            data,
            warnings,
            next_steps,
        };

        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    if options.quiet {
        return Ok(());
    }

    if let Some(human) = human {
        println!("{}", format_human(human));
    }

    Ok(())
}

pub fn emit_error(command: &str, err: &crate::error::Error, json: bool) -> Result<()> {
    let next_steps = error_next_steps(err);
    let hint = next_steps.first().map(|step| step.as_str());
    if json {
        #[derive(Serialize)]
        struct ErrorBody<'a> {
            message: &'a str,
            code: i32,
            kind: &'static str,
            #[serde(skip_serializing_if = "Option::is_none")]
            details: Option<serde_json::Value>,
        }

        #[derive(Serialize)]
        struct Envelope<'a> {
            schema_version: &'static str,
            command: &'a str,
            status: &'static str,
            error: ErrorBody<'a>,
            #[serde(skip_serializing_if = "Vec::is_empty")]
            warnings: Vec<String>,
            #[serde(skip_serializing_if = "Vec::is_empty")]
            next_steps: Vec<String>,
        }

        let payload = Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            status: "error",
            error: ErrorBody {
                message: &err.to_string(),
                code: err.exit_code(),
                kind: error_kind(err),
                details: err.details(),
            },
            warnings: Vec::new(),
            next_steps,
        };

        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    eprintln!("error: {err}");
    if let Some(hint) = hint {
        eprintln!("hint: {hint}");
    }
    Ok(())
}

pub fn format_human(output: &HumanOutput) -> String {
    let mut lines = Vec::new();
    lines.push(output.header.clone());

    push_summary(&mut lines, &output.summary);
    push_section(&mut lines, "Details", &output.details);
    push_section(&mut lines, "Warnings", &output.warnings);
    push_section(&mut lines, "Next steps", &output.next_steps);

    lines.join("\n")
}

/// Global flags that consume the following argument.
const VALUE_FLAGS: [&str; 3] = ["--config", "--root", "--actor"];

pub fn infer_command_name_from_args() -> String {
    command_name(std::env::args().skip(1))
}

fn command_name(args: impl Iterator<Item = String>) -> String {
    let mut positional = Vec::new();
    let mut args = args.peekable();
    while let Some(arg) = args.next() {
        if VALUE_FLAGS.contains(&arg.as_str()) {
            args.next();
            continue;
        }
        if arg.starts_with('-') {
            continue;
        }
        positional.push(arg);
        let wants_subcommand = positional.len() == 1 && positional[0] == "site";
        if !wants_subcommand {
            break;
        }
    }

    match positional.as_slice() {
        [] => "sitevault".to_string(),
        [command] => command.clone(),
        [command, sub, ..] => format!("{command} {sub}"),
    }
}

fn error_kind(err: &crate::error::Error) -> &'static str {
    use crate::error::exit_codes;

    match err.exit_code() {
        exit_codes::USER_ERROR => "user_error",
        exit_codes::BLOCKED => "blocked",
        _ => "operation_failed",
    }
}

fn error_next_steps(err: &crate::error::Error) -> Vec<String> {
    use crate::error::Error;

    match err {
        Error::StoreUnavailable { .. } => {
            vec!["check repository.root and the site id".to_string()]
        }
        Error::ContentNotFound { site, path } if !path.contains('@') => {
            vec![format!("sitevault ls {site} /")]
        }
        Error::ReferenceNotFound(_) => vec!["sitevault history <site> <path>".to_string()],
        Error::Deployment { environment, .. } => {
            vec![format!("retry the publish to '{environment}'")]
        }
        Error::InvalidConfig(_) => vec!["fix sitevault.toml then retry".to_string()],
        _ => Vec::new(),
    }
}

fn push_summary(lines: &mut Vec<String>, summary: &[(String, String)]) {
    if summary.is_empty() {
        return;
    }

    lines.push(String::new());
    lines.push("Summary:".to_string());
    for (key, value) in summary {
        if value.is_empty() {
            lines.push(format!("- {key}"));
        } else {
            lines.push(format!("- {key}: {value}"));
        }
    }
}

fn push_section(lines: &mut Vec<String>, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }

    lines.push(String::new());
    lines.push(format!("{title}:"));
    for item in items {
        lines.push(format!("- {item}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn human_output_sections() {
        let mut human = HumanOutput::new("Wrote /index.xml");
        human.push_summary("site", "blog");
        human.push_summary("unchanged", "");
        human.push_detail("revision abc");
        human.push_warning("nothing to commit");

        let text = format_human(&human);
        assert!(text.starts_with("Wrote /index.xml\n"));
        assert!(text.contains("Summary:\n- site: blog\n- unchanged"));
        assert!(text.contains("Details:\n- revision abc"));
        assert!(text.contains("Warnings:\n- nothing to commit"));
        assert!(!text.contains("Next steps:"));
    }

    #[test]
    fn unavailable_store_has_hint() {
        let err = Error::StoreUnavailable {
            site: "../blog".to_string(),
            kind: crate::registry::StoreKind::Sandbox,
            reason: "invalid site id".to_string(),
        };
        assert_eq!(error_next_steps(&err).len(), 1);
        assert_eq!(error_kind(&err), "user_error");
    }

    #[test]
    fn command_name_skips_flag_values() {
        let args = ["--root", "/tmp/r", "--json", "write", "blog", "/a.xml"];
        assert_eq!(command_name(args.iter().map(|a| a.to_string())), "write");

        let args = ["--actor", "jane", "site", "create", "blog"];
        assert_eq!(command_name(args.iter().map(|a| a.to_string())), "site create");

        assert_eq!(command_name(std::iter::empty()), "sitevault");
    }

    #[test]
    fn deployment_errors_are_operation_failures() {
        let err = Error::Deployment {
            environment: "live".to_string(),
            commit_id: String::new(),
            reason: "conflict".to_string(),
        };
        assert_eq!(error_kind(&err), "operation_failed");
    }
}
