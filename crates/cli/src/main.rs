use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use promptgate_config::ConfigLoader;
use promptgate_core::{DataAvailability, PromptRequest, ScopeInput, Variables};
use promptgate_observability::{init_tracing, DecisionLog, PipelineMetrics};
use promptgate_pipeline::{run_eval, EvalSuite, Pipeline, PipelineOutcome, PipelineRequest};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Parser)]
#[command(name = "promptgate")]
#[command(about = "Keyword intent routing and prompt rendering")]
struct Cli {
    #[arg(long, env = "PROMPTGATE_CONFIG_DIR", default_value = "config")]
    config_dir: PathBuf,

    /// Append one JSON line per pipeline decision under this directory.
    #[arg(long, env = "PROMPTGATE_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Classify {
        query: String,
    },
    Route {
        query: String,
        #[command(flatten)]
        availability: AvailabilityArgs,
    },
    Prompt {
        query: String,
        /// Render for this intent instead of the classified one.
        #[arg(long)]
        intent: Option<String>,
        #[command(flatten)]
        render: RenderArgs,
    },
    Run {
        query: String,
        #[command(flatten)]
        availability: AvailabilityArgs,
        #[command(flatten)]
        render: RenderArgs,
    },
    Eval {
        suite: PathBuf,
    },
    Chat {
        #[command(flatten)]
        render: RenderArgs,
    },
}

#[derive(Debug, Args)]
struct AvailabilityArgs {
    #[arg(long)]
    no_cluster_data: bool,
    #[arg(long)]
    ambiguous: bool,
}

impl AvailabilityArgs {
    fn to_availability(&self) -> DataAvailability {
        DataAvailability {
            has_cluster_data: self.no_cluster_data.then_some(false),
            is_ambiguous: self.ambiguous.then_some(true),
        }
    }
}

#[derive(Debug, Args)]
struct RenderArgs {
    #[arg(long)]
    variant: Option<String>,
    /// Template variable as key=value; repeatable.
    #[arg(long = "var", value_parser = parse_variable)]
    vars: Vec<(String, String)>,
}

impl RenderArgs {
    fn variables(&self) -> Variables {
        self.vars
            .iter()
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect()
    }
}

fn parse_variable(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected key=value, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(anyhow!("variable name must not be empty"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn main() -> Result<()> {
    init_tracing("promptgate_cli");
    let cli = Cli::parse();

    let pipeline = build_pipeline(&cli)?;

    match cli.command {
        Command::Classify { query } => print_json(&pipeline.classify(&query))?,
        Command::Route {
            query,
            availability,
        } => {
            let intent = pipeline.classify(&query);
            let input = ScopeInput::new(&intent, availability.to_availability());
            let scope = promptgate_core::detect_out_of_scope(&input);
            let decision = promptgate_core::route(&input, &pipeline.config().policies.policies);
            print_json(&serde_json::json!({
                "intent": intent,
                "scope": scope,
                "decision": decision,
            }))?;
        }
        Command::Prompt {
            query,
            intent,
            render,
        } => {
            let intent_id = match intent {
                Some(intent_id) => intent_id,
                None => pipeline.classify(&query).intent_id,
            };
            let request = PromptRequest {
                query,
                intent_id,
                variant: render.variant.clone(),
                variables: render.variables(),
            };
            print_json(&pipeline.render(&request))?;
        }
        Command::Run {
            query,
            availability,
            render,
        } => {
            let response = pipeline.handle(&PipelineRequest {
                query,
                data_availability: availability.to_availability(),
                variant: render.variant.clone(),
                variables: render.variables(),
            });
            print_json(&response)?;
        }
        Command::Eval { suite } => {
            let suite = EvalSuite::load(&suite)?;
            let report = run_eval(&pipeline, &suite);
            print_json(&report)?;
            println!(
                "scope accuracy {:.2}, intent accuracy {:.2}, {} failure(s)",
                report.scope_accuracy(),
                report.intent_accuracy(),
                report.failures.len()
            );
            if !report.passed() {
                std::process::exit(1);
            }
        }
        Command::Chat { render } => run_chat(&pipeline, &render)?,
    }

    Ok(())
}

fn build_pipeline(cli: &Cli) -> Result<Pipeline> {
    let snapshot = ConfigLoader::load_dir(&cli.config_dir).with_context(|| {
        format!(
            "failed loading configuration from {}",
            cli.config_dir.display()
        )
    })?;

    let mut pipeline = Pipeline::new(Arc::new(snapshot), PipelineMetrics::shared());
    if let Some(dir) = cli.log_dir.as_ref() {
        pipeline = pipeline.with_decision_log(DecisionLog::new(dir));
    }
    Ok(pipeline)
}

fn run_chat(pipeline: &Pipeline, render: &RenderArgs) -> Result<()> {
    println!("promptgate chat mode. type 'exit' to quit.");

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }

        let message = line.trim();
        if message.eq_ignore_ascii_case("exit") || message.eq_ignore_ascii_case("quit") {
            break;
        }

        if message.is_empty() {
            continue;
        }

        let response = pipeline.handle(&PipelineRequest {
            query: message.to_string(),
            data_availability: DataAvailability::default(),
            variant: render.variant.clone(),
            variables: render.variables(),
        });

        println!(
            "\nintent: {} (confidence {:.2})",
            response.intent.intent_id, response.intent.confidence
        );
        match response.outcome {
            PipelineOutcome::Fallback { decision } => {
                println!("fallback [{}]: {}\n", decision.action, decision.message);
            }
            PipelineOutcome::UnhandledOutOfScope { reasons } => {
                let reasons = reasons
                    .iter()
                    .map(|reason| reason.as_code())
                    .collect::<Vec<_>>();
                println!("out of scope ({}), no fallback policy\n", reasons.join(", "));
            }
            PipelineOutcome::Prompt { render: result } => match result.error() {
                Some(error) => println!("{error}\n"),
                None => println!("\n{}\n", result.prompt()),
            },
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
