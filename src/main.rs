use std::path::PathBuf;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gcsftp::{BucketDriverFactory, Driver, DriverConfig, DriverFactory, ObjectInfo, Session};
use tokio::io::AsyncWriteExt;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "以 FTP 驱动的方式访问 Cloud Storage bucket", long_about = None)]
struct Args {
    /// JSON 配置文件
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 基础 bucket 名称
    #[arg(short, long)]
    bucket: Option<String>,

    /// 每个用户使用独立的 bucket（<bucket>-<user>）
    #[arg(long)]
    bucket_per_user: bool,

    /// 服务账号 JSON 文件
    #[arg(short, long)]
    service_account: Option<PathBuf>,

    /// 存储服务地址
    #[arg(short, long)]
    endpoint: Option<String>,

    /// 登录用户，默认为当前系统用户
    #[arg(short, long)]
    user: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 列出目录
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// 查看文件或目录信息
    Stat { path: String },
    /// 进入目录
    Cd { path: String },
    /// 创建目录
    Mkdir { path: String },
    /// 删除文件
    Rm { path: String },
    /// 递归删除目录
    Rmdir { path: String },
    /// 重命名文件或目录
    Mv { from: String, to: String },
    /// 下载文件，未指定本地路径时写到标准输出
    Get { path: String, local: Option<PathBuf> },
    /// 上传本地文件
    Put { local: PathBuf, path: String },
}

async fn load_config(args: &Args) -> Result<DriverConfig> {
    let mut config = match &args.config {
        Some(path) => DriverConfig::from_file(path)
            .await
            .with_context(|| format!("读取配置文件 {:?} 失败", path))?,
        None => DriverConfig::default(),
    };
    config = config.apply_env()?;

    if let Some(bucket) = &args.bucket {
        config.bucket = bucket.clone();
    }
    if args.bucket_per_user {
        config.bucket_per_user = true;
    }
    if let Some(path) = &args.service_account {
        config.service_account_path = Some(path.clone());
    }
    if let Some(endpoint) = &args.endpoint {
        config.endpoint = endpoint.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args).await?;
    let user = args.user.clone().unwrap_or_else(whoami::username);
    info!(
        "初始化驱动，bucket={}, 按用户分桶={}, 用户={}",
        config.bucket, config.bucket_per_user, user
    );

    let driver = BucketDriverFactory::new(config).new_driver().await?;
    let mut session = Session::new(user);

    match args.command {
        Command::Ls { path } => {
            driver
                .list_dir(&session, &path, &mut |entry: ObjectInfo| -> gcsftp::Result<()> {
                    println!("{}", entry);
                    Ok(())
                })
                .await?;
        }
        Command::Stat { path } => {
            let entry = driver.stat(&session, &path).await?;
            println!("{}", entry);
        }
        Command::Cd { path } => {
            driver.change_dir(&mut session, &path).await?;
            println!("{}", session.cur_dir());
        }
        Command::Mkdir { path } => driver.make_dir(&session, &path).await?,
        Command::Rm { path } => driver.delete_file(&session, &path).await?,
        Command::Rmdir { path } => driver.delete_dir(&session, &path).await?,
        Command::Mv { from, to } => driver.rename(&session, &from, &to).await?,
        Command::Get { path, local } => {
            let (size, mut reader) = driver.get_file(&session, &path, 0).await?;
            let copied = match local {
                Some(local) => {
                    let mut file = tokio::fs::File::create(&local)
                        .await
                        .with_context(|| format!("创建本地文件 {:?} 失败", local))?;
                    let copied = tokio::io::copy(&mut reader, &mut file).await?;
                    file.flush().await?;
                    copied
                }
                None => {
                    let mut stdout = tokio::io::stdout();
                    let copied = tokio::io::copy(&mut reader, &mut stdout).await?;
                    stdout.flush().await?;
                    copied
                }
            };
            info!("下载完成: {} ({} / {} bytes)", path, copied, size);
        }
        Command::Put { local, path } => {
            let file = tokio::fs::File::open(&local)
                .await
                .with_context(|| format!("打开本地文件 {:?} 失败", local))?;
            driver.put_file(&session, &path, Box::new(file), false).await?;
            info!("上传完成: {:?} -> {}", local, path);
        }
    }

    Ok(())
}
