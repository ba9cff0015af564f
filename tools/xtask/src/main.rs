//! # xtask - 开发辅助工具
//!
//! 提供本地质量门禁与开发辅助命令。
//!
//! ## 命令
//!
//! - `check-all`: 运行 fmt、clippy、test
//! - `cov-runtime`: 运行 anim-runtime 覆盖率
//! - `trigger-check`: 编译 JSON 触发器定义并输出诊断

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anim_runtime::dsl::{TriggerMetadata, build_trigger_ast};
use anim_runtime::testing::{MockAnimationDriver, MockDom};
use anim_runtime::{AnimationDriver, AnimationError};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use walkdir::WalkDir;
use xshell::{Shell, cmd};

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "开发辅助工具")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 输出调试日志
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// 运行 fmt、clippy、test 门禁检查
    CheckAll,

    /// 运行 anim-runtime 覆盖率报告
    CovRuntime,

    /// 检查触发器定义文件
    ///
    /// 不带参数时检查 triggers/ 下所有 .json 文件。
    TriggerCheck {
        /// 文件或目录
        path: Option<PathBuf>,

        /// 同时把样式属性名交给驱动校验
        #[arg(long)]
        validate_styles: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = real_main(cli.command) {
        eprintln!("xtask error: {e:#}");
        return ExitCode::from(1);
    }
    ExitCode::from(0)
}

fn init_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn real_main(command: Commands) -> anyhow::Result<()> {
    let sh = Shell::new()?;
    match command {
        Commands::CheckAll => {
            info!("cargo fmt --all -- --check");
            cmd!(sh, "cargo fmt --all -- --check").run()?;

            info!("cargo clippy --workspace --all-targets");
            cmd!(sh, "cargo clippy --workspace --all-targets").run()?;

            info!("cargo test --workspace");
            cmd!(sh, "cargo test --workspace").run()?;
        }
        Commands::CovRuntime => {
            ensure_cargo_llvm_cov_available(&sh)?;

            info!("cargo llvm-cov -p anim-runtime --html");
            cmd!(sh, "cargo llvm-cov -p anim-runtime --all-features --html").run()?;

            eprintln!("\nCoverage HTML: target/llvm-cov/html/index.html");
        }
        Commands::TriggerCheck { path, validate_styles } => {
            trigger_check(path.as_deref(), validate_styles)?;
        }
    }
    Ok(())
}

fn ensure_cargo_llvm_cov_available(sh: &Shell) -> anyhow::Result<()> {
    if cmd!(sh, "cargo llvm-cov --version").quiet().run().is_ok() {
        return Ok(());
    }
    anyhow::bail!(
        "cargo llvm-cov 不可用。\n\
请先安装：\n\
  - cargo install cargo-llvm-cov\n\
  - rustup component add llvm-tools-preview\n\
然后重试。"
    )
}

//=============================================================================
// trigger-check 命令实现
//=============================================================================

/// 默认的触发器定义目录（相对于 workspace root）
const DEFAULT_TRIGGERS_DIR: &str = "triggers";

/// 单个文件的检查结果
#[derive(Default)]
struct TriggerCheckResult {
    files_checked: usize,
    triggers_checked: usize,
    /// 读取或 JSON 解析失败
    load_errors: usize,
    errors: Vec<(String, AnimationError)>,
    warnings: Vec<(String, AnimationError)>,
}

fn trigger_check(path: Option<&Path>, validate_styles: bool) -> anyhow::Result<()> {
    let files = match path {
        Some(p) if p.is_file() => vec![p.to_path_buf()],
        Some(p) if p.is_dir() => collect_trigger_files(p),
        Some(p) => anyhow::bail!("路径不存在: {}", p.display()),
        None => {
            let dir = Path::new(DEFAULT_TRIGGERS_DIR);
            if !dir.exists() {
                anyhow::bail!(
                    "默认触发器目录不存在: {}\n请在 workspace 根目录运行，或指定路径",
                    dir.display()
                );
            }
            collect_trigger_files(dir)
        }
    };

    if files.is_empty() {
        eprintln!("未找到触发器定义文件（.json）");
        return Ok(());
    }
    info!(count = files.len(), "检查触发器定义");

    // 样式属性校验只需要驱动的 validate_style_property，内存驱动即可
    let driver = MockAnimationDriver::new(std::rc::Rc::new(MockDom::new()));
    let driver = validate_styles.then_some(&driver as &dyn AnimationDriver);

    let mut result = TriggerCheckResult::default();
    for file in &files {
        check_trigger_file(file, driver, &mut result);
    }
    print_check_result(&result);

    if result.load_errors > 0 || !result.errors.is_empty() {
        anyhow::bail!("触发器检查发现错误");
    }
    Ok(())
}

fn collect_trigger_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    files
}

/// 文件内容可以是单个触发器，也可以是触发器数组
fn parse_triggers(content: &str) -> serde_json::Result<Vec<TriggerMetadata>> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    if value.is_array() {
        serde_json::from_value(value)
    } else {
        serde_json::from_value(value).map(|t| vec![t])
    }
}

fn check_trigger_file(file: &Path, driver: Option<&dyn AnimationDriver>, result: &mut TriggerCheckResult) {
    let file_id = file.display().to_string();
    result.files_checked += 1;

    let content = match std::fs::read_to_string(file) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[ERROR] {}: 无法读取文件 - {}", file_id, e);
            result.load_errors += 1;
            return;
        }
    };
    let triggers = match parse_triggers(&content) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("[ERROR] {}: JSON 解析失败 - {}", file_id, e);
            result.load_errors += 1;
            return;
        }
    };

    for metadata in &triggers {
        result.triggers_checked += 1;
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let ast = build_trigger_ast(driver, metadata, &mut errors, &mut warnings);
        debug!(
            file = %file_id,
            trigger = %metadata.name,
            states = ast.states.len(),
            transitions = ast.transitions.len(),
            "编译触发器"
        );

        let location = format!("{} @{}", file_id, metadata.name);
        result
            .errors
            .extend(errors.into_iter().map(|e| (location.clone(), e)));
        result
            .warnings
            .extend(warnings.into_iter().map(|w| (location.clone(), w)));
    }
}

fn print_check_result(result: &TriggerCheckResult) {
    eprintln!("─────────────────────────────────────────────────────");
    eprintln!(
        "检查完成: {} 个文件, {} 个触发器",
        result.files_checked, result.triggers_checked
    );
    eprintln!();

    for (location, error) in &result.errors {
        eprintln!("[ERROR] {}: {}", location, error);
    }
    for (location, warning) in &result.warnings {
        eprintln!("[WARN] {}: {}", location, warning);
    }

    let error_count = result.load_errors + result.errors.len();
    let warn_count = result.warnings.len();

    eprintln!();
    if error_count > 0 {
        eprintln!("❌ {} 个错误, {} 个警告", error_count, warn_count);
    } else if warn_count > 0 {
        eprintln!("⚠️  0 个错误, {} 个警告", warn_count);
    } else {
        eprintln!("✅ 检查通过，无错误");
    }
}
