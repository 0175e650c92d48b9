//! Operator front end for the gridtest pool harness.
#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use gridtest_common::{
    AccessFeature, AccountingGroup, AccountingGroupFeature, CollectorFeature, ExecuteFeature,
    FeatureTemplate, HarnessConfig, HarnessError, JobFilter, LogConfig, ParamBundle, PoolObserver,
    QueueWait, SchedulerFeature, SlotWait, init_logging,
};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "gridtest", version, about = "Grid pool test harness")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Harness config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Collector to query instead of the configured one
    #[arg(long, global = true)]
    collector: Option<String>,

    /// Schedd whose queue is read instead of the configured one
    #[arg(long, global = true)]
    schedd: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the parameters of a role template
    Feature {
        #[command(subcommand)]
        role: Role,

        /// Output format
        #[arg(long, default_value = "json", global = true)]
        format: OutputFormat,
    },
    /// Wait for the pool to converge
    Wait {
        #[command(subcommand)]
        target: WaitTarget,
    },
    /// List nodes whose master reports to the collector
    Nodes {
        /// Only nodes in this group (repeatable; all must match)
        #[arg(long = "group")]
        groups: Vec<String>,
    },
}

#[derive(Subcommand)]
enum Role {
    /// Execute node with one or more startds
    Execute {
        #[arg(long, default_value_t = 1)]
        startd: u32,
        /// Slots per startd
        #[arg(long, default_value_t = 1)]
        slots: u32,
        /// Cpus per partitionable slot (0 for static slots)
        #[arg(long, default_value_t = 0)]
        dynamic: u32,
        /// Append to the node's daemon list instead of replacing it
        #[arg(long)]
        dl_append: bool,
        /// Leave start/suspend policy at the pool defaults
        #[arg(long)]
        no_dedicated: bool,
        /// Allow preemption
        #[arg(long)]
        preemption: bool,
        /// Advertise a distinct Machine per startd
        #[arg(long)]
        ad_machine: bool,
        #[arg(long)]
        collector_host: Option<String>,
    },
    /// Additional schedds
    Scheduler {
        #[arg(long, default_value_t = 1)]
        schedd: u32,
        /// Replace the node's daemon list instead of appending
        #[arg(long)]
        no_dl_append: bool,
    },
    /// Additional collectors on consecutive ports
    Collector {
        #[arg(long, default_value_t = 1)]
        collector: u32,
        #[arg(long, default_value_t = 10000)]
        port_start: u16,
        #[arg(long)]
        no_dl_append: bool,
        /// Keep collector plugins enabled
        #[arg(long)]
        keep_plugins: bool,
    },
    /// Open read/write access
    Access {
        #[arg(long)]
        collector_host: Option<String>,
    },
    /// Accounting groups, e.g. `--group a=0.25 --group b=10:static:surplus`
    Accounting {
        #[arg(long = "group", value_parser = parse_group, required = true)]
        groups: Vec<AccountingGroup>,
        /// Default surplus policy
        #[arg(long)]
        accept_surplus: bool,
    },
}

#[derive(Args)]
struct Timing {
    /// Time between samples
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    interval: Duration,
    /// Give up after this long
    #[arg(long, default_value = "10m", value_parser = humantime::parse_duration)]
    max_wait: Duration,
}

#[derive(Subcommand)]
enum WaitTarget {
    /// Wait for startd slots to report
    Slots {
        #[arg(long)]
        count: u64,
        #[arg(long)]
        group: Option<String>,
        /// Count accepted once the maximum wait is exceeded
        #[arg(long)]
        required: Option<u64>,
        /// Nodes expected to report, listed on timeout if absent
        #[arg(long, value_delimiter = ',')]
        expect: Vec<String>,
        #[command(flatten)]
        timing: Timing,
    },
    /// Wait for the job queue to drain
    Queue {
        #[arg(long, conflicts_with = "tag")]
        cluster: Option<u64>,
        #[arg(long)]
        tag: Option<String>,
        /// Job attribute holding the tag
        #[arg(long, requires = "tag")]
        tag_attr: Option<String>,
        #[command(flatten)]
        timing: Timing,
    },
}

#[derive(ValueEnum, Clone, Copy)]
enum OutputFormat {
    Json,
    Toml,
}

fn parse_group(s: &str) -> Result<AccountingGroup, String> {
    let (name, rest) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=QUOTA[:static][:surplus|:nosurplus], got '{s}'"))?;
    if name.is_empty() || name.contains(',') {
        return Err(format!("invalid group name '{name}'"));
    }
    let mut parts = rest.split(':');
    let quota: f64 = parts
        .next()
        .unwrap_or_default()
        .parse()
        .map_err(|e| format!("invalid quota in '{s}': {e}"))?;
    let mut group = AccountingGroup::dynamic(name, quota);
    for flag in parts {
        match flag {
            "static" => group.is_static = true,
            "surplus" => group.accept_surplus = Some(true),
            "nosurplus" => group.accept_surplus = Some(false),
            other => return Err(format!("unknown group flag '{other}'")),
        }
    }
    Ok(group)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let result = run(cli);
    if let Err(err) = &result
        && let Some(entry) = catalog_entry(err)
    {
        eprint!("{entry}");
    }
    result
}

/// Catalog entry with remediation steps for a harness error anywhere in
/// the chain.
fn catalog_entry(err: &anyhow::Error) -> Option<String> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<HarnessError>())
        .map(|harness| harness.code().entry().format_full())
}

fn run(cli: Cli) -> Result<()> {

    let mut log_config = LogConfig::from_env("info");
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    if cli.json_logs {
        log_config = log_config.json();
    }
    init_logging(&log_config)?;

    match cli.command {
        Commands::Feature { role, format } => render_feature(role, format),
        Commands::Wait { target } => {
            let config = load_config(cli.config, cli.collector, cli.schedd)?;
            wait(&config, target)
        }
        Commands::Nodes { groups } => {
            let config = load_config(cli.config, cli.collector, cli.schedd)?;
            let nodes = PoolObserver::from_config(&config)
                .reporting_nodes(&groups)
                .context("Failed to list reporting nodes")?;
            for node in nodes {
                println!("{node}");
            }
            Ok(())
        }
    }
}

fn load_config(
    path: Option<PathBuf>,
    collector: Option<String>,
    schedd: Option<String>,
) -> Result<HarnessConfig> {
    let mut config = HarnessConfig::load(path.as_deref()).context("Failed to load harness config")?;
    if collector.is_some() {
        config.collector_host = collector;
    }
    if schedd.is_some() {
        config.schedd_name = schedd;
    }
    Ok(config)
}

fn render<T>(template: &T, format: OutputFormat) -> Result<(ParamBundle, T::Output)>
where
    T: FeatureTemplate,
{
    let params = template.params();
    if let OutputFormat::Toml = format {
        print!("{}", toml::to_string(&params)?);
    }
    Ok((params, template.output()))
}

fn render_feature(role: Role, format: OutputFormat) -> Result<()> {
    let (params, output) = match role {
        Role::Execute {
            startd,
            slots,
            dynamic,
            dl_append,
            no_dedicated,
            preemption,
            ad_machine,
            collector_host,
        } => {
            let template = ExecuteFeature {
                dl_append,
                dedicated: !no_dedicated,
                preemption,
                ad_machine,
                collector_host,
                ..ExecuteFeature::new(startd, slots, dynamic)
            };
            let (params, counts) = render(&template, format)?;
            info!(slots = counts.slots, dynamic_slots = counts.dynamic_slots, "execute feature");
            (params, json!(counts))
        }
        Role::Scheduler {
            schedd,
            no_dl_append,
        } => {
            let template = SchedulerFeature {
                schedd,
                dl_append: !no_dl_append,
            };
            let (params, names) = render(&template, format)?;
            (params, json!(names))
        }
        Role::Collector {
            collector,
            port_start,
            no_dl_append,
            keep_plugins,
        } => {
            let template = CollectorFeature {
                collector,
                port_start,
                dl_append: !no_dl_append,
                disable_plugins: !keep_plugins,
            };
            template.validate()?;
            let (params, names) = render(&template, format)?;
            (params, json!(names))
        }
        Role::Access { collector_host } => {
            let (params, ()) = render(&AccessFeature { collector_host }, format)?;
            (params, serde_json::Value::Null)
        }
        Role::Accounting {
            groups,
            accept_surplus,
        } => {
            let template = AccountingGroupFeature {
                groups,
                accept_surplus,
            };
            let (params, ()) = render(&template, format)?;
            (params, serde_json::Value::Null)
        }
    };

    if let OutputFormat::Json = format {
        let doc = json!({ "params": params, "output": output });
        println!("{}", serde_json::to_string_pretty(&doc)?);
    }
    Ok(())
}

fn wait(config: &HarnessConfig, target: WaitTarget) -> Result<()> {
    let observer = PoolObserver::from_config(config);
    let result = match target {
        WaitTarget::Slots {
            count,
            group,
            required,
            expect,
            timing,
        } => {
            let mut wait = SlotWait::new(count)
                .interval(timing.interval)
                .max_wait(timing.max_wait);
            wait.group = group;
            wait.required = required;
            if !expect.is_empty() {
                wait = wait.expected_nodes(&expect);
            }
            observer.poll_for_slots(&wait)
        }
        WaitTarget::Queue {
            cluster,
            tag,
            tag_attr,
            timing,
        } => {
            let filter = match (cluster, tag) {
                (Some(cluster), _) => JobFilter::Cluster(cluster),
                (None, Some(value)) => JobFilter::Tag {
                    attr: tag_attr,
                    value,
                },
                (None, None) => JobFilter::All,
            };
            let wait = QueueWait {
                filter,
                interval: timing.interval,
                max_wait: timing.max_wait,
            };
            observer.poll_for_empty_job_queue(&wait)
        }
    };

    match result {
        Ok(done) => {
            println!(
                "{}",
                serde_json::to_string(&json!({
                    "converged": done.is_converged(),
                    "count": done.count(),
                    "elapsed_secs": done.elapsed().as_secs_f64(),
                }))?
            );
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}
