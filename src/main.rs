// ==========================================
// 线索派单引擎 - 命令行入口
// ==========================================
// 子命令: init-db / serve / sweep / dispatch / outcome / lead-status /
//         import-providers / catalog / policy show|set / stats / lead
// 输出: JSON（便于脚本与运营后台消费）
// ==========================================

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;

use lead_dispatch::app::{get_default_db_path, AppState, DB_PATH_ENV};
use lead_dispatch::config::PolicyUpdate;
use lead_dispatch::domain::types::{AssignmentStatus, LeadStatus, Urgency};
use lead_dispatch::domain::{DispatchRequest, OutcomeUpdate};
use lead_dispatch::logging;

/// 线索派单引擎
#[derive(Parser, Debug)]
#[command(name = "lead-dispatch", version, about, long_about = None)]
struct Cli {
    /// 数据库文件路径
    #[arg(long, global = true, env = DB_PATH_ENV)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 初始化数据库（幂等）
    InitDb,
    /// 常驻运行过期巡检
    Serve {
        /// 巡检间隔（秒）
        #[arg(long, env = "DISPATCH_SWEEP_INTERVAL_SECS", default_value_t = 300)]
        interval_secs: u64,
    },
    /// 执行一次过期巡检
    Sweep,
    /// 派单
    Dispatch(DispatchArgs),
    /// 人工重派
    Redispatch { lead_id: String },
    /// 回写联系结果
    Outcome(OutcomeArgs),
    /// 更新线索状态
    LeadStatus {
        lead_id: String,
        status: String,
        #[arg(long, default_value = "cli")]
        actor: String,
    },
    /// 导入服务商名录 CSV
    ImportProviders { path: PathBuf },
    /// 登记服务目录: 服务名 → 类目
    Catalog { service: String, category: String },
    /// 派单策略
    Policy {
        #[command(subcommand)]
        command: PolicyCommand,
    },
    /// 运营派单看板
    Stats,
    /// 线索详情（指派 + 事件轨迹）
    Lead { lead_id: String },
    /// 按状态列出指派
    Assignments {
        status: String,
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
}

#[derive(Args, Debug)]
struct DispatchArgs {
    #[arg(long)]
    lead_id: String,
    #[arg(long)]
    service: String,
    #[arg(long, default_value = "medium")]
    urgency: String,
    #[arg(long, allow_negative_numbers = true)]
    lat: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    lon: Option<f64>,
    #[arg(long)]
    postal_code: Option<String>,
    #[arg(long)]
    city: Option<String>,
    /// 来源表（leads / devis_requests）
    #[arg(long, default_value = "leads")]
    source: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutcomeKind {
    Delivered,
    Viewed,
    Responded,
    Declined,
    Billed,
}

#[derive(Args, Debug)]
struct OutcomeArgs {
    assignment_id: String,
    #[arg(value_enum)]
    kind: OutcomeKind,
    /// 响应备注 / 拒绝原因
    #[arg(long)]
    note: Option<String>,
    /// 计费金额（billed 必填）
    #[arg(long)]
    amount: Option<f64>,
    #[arg(long, default_value = "cli")]
    actor: String,
}

#[derive(Subcommand, Debug)]
enum PolicyCommand {
    /// 查看当前策略
    Show {
        /// 显示原始配置项
        #[arg(long)]
        raw: bool,
    },
    /// 更新策略: key=value ...
    Set {
        #[arg(long = "by")]
        updated_by: String,
        #[arg(required = true)]
        entries: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();

    let db_path = cli.db.unwrap_or_else(get_default_db_path);
    let state = AppState::new(db_path).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::InitDb => {
            tracing::info!(db_path = %state.db_path, "数据库已就绪");
            print_json(&serde_json::json!({ "db_path": state.db_path }))
        }
        Commands::Serve { interval_secs } => {
            if interval_secs == 0 {
                bail!("巡检间隔必须大于 0");
            }
            tracing::info!("==================================================");
            tracing::info!("{} v{}", lead_dispatch::APP_NAME, lead_dispatch::VERSION);
            tracing::info!("使用数据库: {}", state.db_path);
            tracing::info!("==================================================");
            state.scheduler.run_forever(Duration::from_secs(interval_secs)).await;
            Ok(())
        }
        Commands::Sweep => print_json(&state.dispatch_api.sweep().await?),
        Commands::Dispatch(args) => {
            let request = DispatchRequest {
                lead_id: args.lead_id,
                service_name: args.service,
                urgency: args.urgency.parse::<Urgency>().map_err(anyhow::Error::msg)?,
                latitude: args.lat,
                longitude: args.lon,
                postal_code: args.postal_code,
                city: args.city,
                source_table: args.source,
            };
            print_json(&state.dispatch_api.dispatch(&request).await?)
        }
        Commands::Redispatch { lead_id } => print_json(&state.dispatch_api.redispatch(&lead_id).await?),
        Commands::Outcome(args) => {
            let update = outcome_update(&args)?;
            print_json(&state.dispatch_api.record_outcome(&args.assignment_id, &update, &args.actor)?)
        }
        Commands::LeadStatus { lead_id, status, actor } => {
            let status = status.parse::<LeadStatus>().map_err(anyhow::Error::msg)?;
            let changed = state.dispatch_api.update_lead_status(&lead_id, status, &actor)?;
            print_json(&serde_json::json!({ "lead_id": lead_id, "status": status, "changed": changed }))
        }
        Commands::ImportProviders { path } => {
            let report = state
                .provider_importer
                .import_file(&path, chrono::Utc::now())
                .with_context(|| format!("导入失败: {}", path.display()))?;
            print_json(&report)
        }
        Commands::Catalog { service, category } => {
            state.dispatch_api.set_service_category(&service, &category)?;
            print_json(&serde_json::json!({ "service": service, "category": category }))
        }
        Commands::Policy { command } => match command {
            PolicyCommand::Show { raw: true } => print_json(&state.policy_api.get_raw_entries()?),
            PolicyCommand::Show { raw: false } => print_json(&state.policy_api.get_policy()?),
            PolicyCommand::Set { updated_by, entries } => {
                let mut update = PolicyUpdate::new();
                for entry in &entries {
                    let (key, value) = entry
                        .split_once('=')
                        .with_context(|| format!("配置项格式应为 key=value: {}", entry))?;
                    update.set(key.trim(), value.trim())?;
                }
                print_json(&state.policy_api.update_policy(&update, &updated_by)?)
            }
        },
        Commands::Stats => print_json(&state.dispatch_api.dispatch_board()?),
        Commands::Lead { lead_id } => print_json(&state.dispatch_api.get_lead_detail(&lead_id)?),
        Commands::Assignments { status, limit, offset } => {
            let status = status.parse::<AssignmentStatus>().map_err(anyhow::Error::msg)?;
            print_json(&state.dispatch_api.list_assignments_by_status(status, limit, offset)?)
        }
    }
}

fn outcome_update(args: &OutcomeArgs) -> Result<OutcomeUpdate> {
    let update = match args.kind {
        OutcomeKind::Delivered => OutcomeUpdate::Delivered,
        OutcomeKind::Viewed => OutcomeUpdate::Viewed,
        OutcomeKind::Responded => OutcomeUpdate::Responded {
            feedback: args.note.clone(),
        },
        OutcomeKind::Declined => OutcomeUpdate::Declined {
            reason: args.note.clone(),
        },
        OutcomeKind::Billed => OutcomeUpdate::Billed {
            amount: args.amount.context("billed 需要 --amount")?,
        },
    };
    Ok(update)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
