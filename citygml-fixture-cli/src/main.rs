use anyhow::{Context, Result};
use citygml_fixture::profile::testcase_name;
use citygml_fixture::{filter_gml_content, FilterOptions, OutputLayout, Profile, ZipHandler};
use clap::{Parser, Subcommand};
use rayon::ThreadPoolBuilder;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 1つのGMLファイルを指定したgml:idだけに絞り込む
    Filter {
        /// 入力GMLファイル
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// 出力GMLファイル
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// 残すgml:id（複数指定可）
        #[arg(long = "id", value_name = "GML_ID")]
        ids: Vec<String>,

        /// 残すgml:idを1行に1つ書いたファイル
        #[arg(long, value_name = "FILE")]
        ids_file: Option<PathBuf>,

        /// 出力をXMLとして再検証する
        #[arg(long)]
        verify: bool,
    },

    /// プロファイルに従ってCityGML ZIPからテストケースを作成する
    Extract {
        /// プロファイル（TOML）
        #[arg(value_name = "PROFILE")]
        profile: PathBuf,

        /// CityGML ZIPファイルのあるディレクトリ
        #[arg(long, value_name = "DIR")]
        data_dir: PathBuf,

        /// codelists/schemasの出力先
        #[arg(long, value_name = "DIR")]
        artifacts: PathBuf,

        /// テストケースの出力先
        #[arg(long, value_name = "DIR")]
        testcases: PathBuf,

        /// テストケース名（デフォルト: プロファイルのディレクトリから決定）
        #[arg(long)]
        name: Option<String>,

        /// 並列処理スレッド数（デフォルト: CPUコア数）
        #[arg(short, long)]
        threads: Option<usize>,

        /// 出力をXMLとして再検証する
        #[arg(long)]
        verify: bool,
    },
}

fn main() -> Result<()> {
    // ログの初期化
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    // 処理開始時間を記録
    let start_time = std::time::Instant::now();

    let result = match args.command {
        Command::Filter {
            input,
            output,
            ids,
            ids_file,
            verify,
        } => run_filter(&input, &output, ids, ids_file.as_deref(), verify),
        Command::Extract {
            profile,
            data_dir,
            artifacts,
            testcases,
            name,
            threads,
            verify,
        } => {
            // スレッドプールの設定
            if let Some(threads) = threads {
                ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build_global()
                    .context("Failed to build thread pool")?;
            }
            run_extract(&profile, &data_dir, &artifacts, &testcases, name, verify)
        }
    };

    if let Err(e) = &result {
        error!("{:#}", e);
    }

    // 処理時間を表示
    let elapsed = start_time.elapsed();
    info!("Total processing time: {:?}", elapsed);

    result
}

fn run_filter(
    input: &Path,
    output: &Path,
    ids: Vec<String>,
    ids_file: Option<&Path>,
    verify: bool,
) -> Result<()> {
    let mut targets: BTreeSet<String> = ids.into_iter().collect();
    if let Some(path) = ids_file {
        targets.extend(read_ids_file(path)?);
    }
    info!("Processing GML file: {:?} ({} target ids)", input, targets.len());

    let content = fs::read(input).with_context(|| format!("Failed to read {:?}", input))?;
    let filtered = filter_gml_content(
        &content,
        &targets,
        FilterOptions {
            verify_output: verify,
        },
    )
    .with_context(|| format!("Failed to filter {:?}", input))?;

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(output, &filtered.content).with_context(|| format!("Failed to write {:?}", output))?;
    info!("Written filtered GML: {:?}", output);

    // 参照されているテクスチャ画像を出力（入力ファイルと同じディレクトリからの相対パス）
    for image in &filtered.referred_images {
        println!("{}", image);
    }
    Ok(())
}

/// 1行に1つのgml:id。空行と`#`で始まる行は無視する
fn read_ids_file(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn run_extract(
    profile_path: &Path,
    data_dir: &Path,
    artifacts: &Path,
    testcases: &Path,
    name: Option<String>,
    verify: bool,
) -> Result<()> {
    let profile = Profile::load(profile_path)?;

    // テストケース名はプロファイルの置き場所から決める
    let name = match name {
        Some(name) => name,
        None => {
            let profile_path = fs::canonicalize(profile_path)
                .with_context(|| format!("Failed to resolve {:?}", profile_path))?;
            let testcases_root =
                fs::canonicalize(testcases).unwrap_or_else(|_| testcases.to_path_buf());
            testcase_name(&profile_path, &testcases_root)
                .context("Cannot derive a testcase name from the profile path; use --name")?
        }
    };

    let zip_path = data_dir.join(&profile.citygml_zip_name);
    info!("Processing ZIP file: {:?} -> testcase {}", zip_path, name);

    let layout = OutputLayout::new(artifacts, testcases, &zip_path, &name);
    let summary = ZipHandler::new(&zip_path).extract(
        &profile.filter.tree,
        &layout,
        FilterOptions {
            verify_output: verify,
        },
    )?;

    info!(
        "Extracted: {} filtered GML, {} images, {} copied, {} artifacts",
        summary.filtered, summary.images, summary.copied, summary.artifacts
    );
    info!("Written to {:?}", layout.testcase_dir);
    Ok(())
}
