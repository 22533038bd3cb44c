//! Console rendering for runs, validation and tool listings

use colored::Colorize;
use serde_json::Value;

use crate::mcp::types::{ServerIdentity, ToolInfo};
use crate::testing::report::{RunReport, RunStatus, StepOutcome, StepStatus};
use crate::testing::{Collection, ValidationErrors};

pub fn run_header(collection: &Collection) {
    println!(
        "\n{} {}",
        "Running Collection:".blue().bold(),
        collection.name.white().bold()
    );
    if let Some(desc) = &collection.description {
        println!("  {}", desc.dimmed());
    }
    println!("  Server: {}", collection.server.target().dimmed());
}

pub fn report(report: &RunReport, quiet: bool, show_responses: bool) {
    if !quiet {
        if let Some(identity) = &report.server.identity {
            println!("  {} Connected to {}", "✓".green(), identity);
        }
        println!("\n{}", "Steps:".cyan());
        for step in &report.steps {
            print_step(step, show_responses);
        }
    }

    let summary = &report.summary;
    let counts = format!(
        "{} passed, {} failed, {} errors, {} skipped ({}ms)",
        summary.passed, summary.failed, summary.errors, summary.skipped, report.duration_ms
    );
    match report.status {
        RunStatus::Passed => println!(
            "\n{} {} {}\n",
            "✓".green().bold(),
            "Collection Passed:".green().bold(),
            counts
        ),
        RunStatus::Failed => println!(
            "\n{} {} {}\n",
            "✗".red().bold(),
            "Collection Failed:".red().bold(),
            counts
        ),
    }
}

fn print_step(step: &StepOutcome, show_responses: bool) {
    let marker = match step.status {
        StepStatus::Success => "✓".green(),
        StepStatus::Failed | StepStatus::Error => "✗".red(),
        StepStatus::Skipped => "○".dimmed(),
    };

    let detail = match (&step.tool, &step.assertion) {
        (Some(tool), _) => format!("{} {}", step.kind, tool),
        (None, Some(assertion)) => match &assertion.path {
            Some(path) => format!("{} {} {}", step.kind, assertion.op, path),
            None => format!("{} {}", step.kind, assertion.op),
        },
        _ => step.kind.to_string(),
    };

    let timing = if step.status == StepStatus::Skipped {
        String::new()
    } else if step.attempts > 1 {
        format!(" ({}ms, {} attempts)", step.duration_ms, step.attempts)
    } else {
        format!(" ({}ms)", step.duration_ms)
    };

    println!("  {} {} {}{}", marker, step.step_id, detail.dimmed(), timing.dimmed());

    if let Some(error) = &step.error {
        let label = step.error_kind.as_deref().unwrap_or("skipped");
        println!("      {} {}", format!("{}:", label).red(), error);
    }

    if let Some(assertion) = &step.assertion {
        if step.status == StepStatus::Failed {
            println!("      {}", assertion.message.red());
            if let Some(expected) = &assertion.expected {
                println!("      expected: {}", expected.to_string().dimmed());
            }
            if let Some(actual) = &assertion.actual {
                println!("      actual:   {}", actual.to_string().dimmed());
            }
        }
    }

    if show_responses {
        if let Some(output) = &step.output {
            print_json_block(output);
        }
    }
}

fn print_json_block(value: &Value) {
    let text = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    for line in text.lines() {
        println!("      {}", line.dimmed());
    }
}

pub fn validation_ok(collection: &Collection) {
    println!(
        "{} {} ({} steps)",
        "✓".green(),
        collection.name.white().bold(),
        collection.steps.len()
    );
}

pub fn validation_errors(errors: &ValidationErrors) {
    println!(
        "{} {} problem(s) found:",
        "✗".red(),
        errors.issues().len()
    );
    for issue in errors.issues() {
        print!("  {} {}", issue.path.yellow(), issue.message);
        match &issue.suggestion {
            Some(suggestion) => println!(" {}", format!("({})", suggestion).dimmed()),
            None => println!(),
        }
    }
}

pub fn tools(server: &ServerIdentity, tools: &[ToolInfo]) {
    println!("{} {}", "Server:".cyan(), server);

    if tools.is_empty() {
        println!("No tools exposed");
        return;
    }

    println!("{} ({})", "Tools:".cyan(), tools.len());
    for tool in tools {
        println!("\n  {}", tool.name.white().bold());
        if let Some(description) = &tool.description {
            println!("    {}", description.dimmed());
        }
        for param in tool.parameters() {
            let required = if param.required { "required" } else { "optional" };
            let mut line = format!("    - {}: {} ({})", param.name, param.kind, required);
            if let Some(description) = &param.description {
                line.push_str(&format!(" {}", description));
            }
            println!("{}", line);
        }
    }
}
