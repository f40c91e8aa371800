use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use xshell::{Shell, cmd};

#[derive(Parser)]
#[command(name = "xtask", about = "Gattseal 开发任务自动化")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 构建核心库 (release)
    Build,
    /// 运行测试
    Test {
        /// 只运行名称包含该字符串的测试
        filter: Option<String>,
    },
    /// 运行 clippy 与格式检查
    Lint,
    /// 运行测试并生成覆盖率报告
    Coverage,
    /// 清理构建产物
    Clean,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;

    // 确保在项目根目录执行
    let project_root = match std::env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => std::path::PathBuf::from(dir)
            .parent()
            .map(std::path::Path::to_path_buf)
            .context("xtask manifest has no parent directory")?,
        Err(_) => std::env::current_dir()?,
    };
    sh.change_dir(&project_root);

    match cli.command {
        Commands::Build => build(&sh)?,
        Commands::Test { filter } => test(&sh, filter.as_deref())?,
        Commands::Lint => lint(&sh)?,
        Commands::Coverage => coverage(&sh)?,
        Commands::Clean => clean(&sh)?,
    }

    Ok(())
}

fn build(sh: &Shell) -> Result<()> {
    println!("🔨 构建 gattseal-core...");
    cmd!(sh, "cargo build --release -p gattseal-core").run()?;
    println!("✅ 构建完成");
    Ok(())
}

fn test(sh: &Shell, filter: Option<&str>) -> Result<()> {
    println!("🧪 运行测试...");
    match filter {
        Some(filter) => cmd!(sh, "cargo test --workspace {filter}").run()?,
        None => cmd!(sh, "cargo test --workspace").run()?,
    }
    println!("✅ 测试完成");
    Ok(())
}

fn lint(sh: &Shell) -> Result<()> {
    println!("🔍 运行 clippy...");
    cmd!(sh, "cargo clippy --workspace --all-targets -- -D warnings").run()?;
    cmd!(sh, "cargo fmt --all -- --check").run()?;
    println!("✅ 检查通过");
    Ok(())
}

fn coverage(sh: &Shell) -> Result<()> {
    println!("📊 运行测试覆盖率分析...");

    // 检查 cargo-tarpaulin 是否安装
    if cmd!(sh, "cargo tarpaulin --version").run().is_err() {
        println!("📦 安装 cargo-tarpaulin...");
        cmd!(sh, "cargo install cargo-tarpaulin").run()?;
    }

    println!("🔍 分析中...");
    cmd!(
        sh,
        "cargo tarpaulin --packages gattseal-core --out Html --output-dir target/coverage"
    )
    .run()?;

    println!("✅ 覆盖率报告已生成");
    println!("   HTML 报告: target/coverage/tarpaulin-report.html");
    Ok(())
}

fn clean(sh: &Shell) -> Result<()> {
    println!("🧹 清理构建产物...");
    cmd!(sh, "cargo clean").run()?;
    println!("✅ 清理完成");
    Ok(())
}
