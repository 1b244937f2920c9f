use clap::Parser;
use log::{info, warn};
use sectorscan_core::{
    inspect_sector, load_bitmap, resolve_geometry, ForcedReallocation, ScanOptions, SectorReport,
    SectorScanError, VolumeGeometry, VolumeIo, VolumeTarget,
};
use sectorscan_platform::open_volume;
use std::io::{self, BufRead, Write};

mod prompt;
mod render;

const REWRITE_QUESTION: &str = "Try to rewrite that cluster with dummy data (y/n)? ";

#[derive(Parser, Debug)]
#[command(name = "sectorscan")]
#[command(
    version,
    about = "Map a physical disk sector to an NTFS cluster and check what is stored there"
)]
#[command(long_about = "Takes a physical disk sector number (in decimal), maps it to the \
NTFS cluster using that sector and determines what is located there. If the cluster is unused, \
tries to read it; if the read fails, offers to write dummy data there so a SMART drive can \
reallocate the sector.")]
struct Cli {
    /// Drive letter of the volume (C or C:)
    volume: String,

    /// Always offer to overwrite an empty cluster, even if it was read successfully
    #[arg(long)]
    force: bool,

    /// Physical disk sector to query; asked for interactively when omitted
    #[arg(long)]
    sector: Option<u64>,

    /// Rewrite the cluster without asking for confirmation
    #[arg(long)]
    yes: bool,

    /// Print reports as JSON
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            force_rewrite: self.force,
            ..ScanOptions::default()
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = VolumeTarget::parse(&cli.volume)
        .and_then(|target| open_volume(&target))
        .map_err(anyhow::Error::from)
        .and_then(|volume| {
            let stdin = io::stdin();
            run(volume, &cli, &mut stdin.lock(), &mut io::stdout())
        });
    report_outcome(result)
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();
}

/// Configuration and consistency problems end the run with a diagnostic;
/// everything else is fatal.
fn report_outcome(result: anyhow::Result<()>) -> anyhow::Result<()> {
    match result {
        Err(err) => match err.downcast_ref::<SectorScanError>() {
            Some(scan_err) if scan_err.is_reportable() => {
                eprintln!("Error: {}", scan_err);
                Ok(())
            }
            _ => Err(err),
        },
        ok => ok,
    }
}

fn close_after_failure<V: VolumeIo>(volume: V) {
    if let Err(err) = volume.close() {
        warn!("Failed to close volume: {}", err);
    }
}

fn run<V, R, W>(mut volume: V, cli: &Cli, input: &mut R, output: &mut W) -> anyhow::Result<()>
where
    V: VolumeIo,
    R: BufRead,
    W: Write,
{
    let options = cli.scan_options();

    let (geometry, report) = match inspect(&mut volume, cli, &options, input, output) {
        Ok(inspection) => inspection,
        Err(err) => {
            close_after_failure(volume);
            return Err(err.into());
        }
    };

    if cli.json {
        writeln!(output, "{}", report.to_json()?)?;
    } else {
        write!(output, "{}", render::sector_report(&report))?;
    }

    if !report.offers_rewrite(options.force_rewrite) {
        info!("Done.");
        volume.close()?;
        return Ok(());
    }

    let confirmed = if cli.yes {
        true
    } else {
        match prompt::confirm(input, output, REWRITE_QUESTION) {
            Ok(answer) => answer,
            Err(err) => {
                close_after_failure(volume);
                return Err(err.into());
            }
        }
    };
    if !confirmed {
        volume.close()?;
        return Ok(());
    }

    let rewrite = ForcedReallocation::new(volume, report.cluster, geometry.cluster_size, &options);
    let relocation = rewrite.run().map_err(|failure| {
        eprint!("{}", render::relocation_failure(&failure));
        failure.error
    })?;
    if cli.json {
        writeln!(output, "{}", serde_json::to_string_pretty(&relocation)?)?;
    } else {
        write!(output, "{}", render::relocation_report(&relocation))?;
    }
    Ok(())
}

fn inspect<V, R, W>(
    volume: &mut V,
    cli: &Cli,
    options: &ScanOptions,
    input: &mut R,
    output: &mut W,
) -> sectorscan_core::Result<(VolumeGeometry, SectorReport)>
where
    V: VolumeIo,
    R: BufRead,
    W: Write,
{
    let geometry = resolve_geometry(volume)?.geometry;
    let bitmap = load_bitmap(volume)?;

    let sector = match cli.sector {
        Some(sector) => sector,
        None => prompt::read_sector(input, output)?,
    };
    let report = inspect_sector(volume, &geometry, &bitmap, sector, options)?;
    Ok((geometry, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sectorscan_core::protocol::{ERROR_CRC, LOOKUP_STREAM_FLAG_DATA_ATTRIBUTE};
    use sectorscan_core::test_utils::{MockCall, MockVolume};

    const VOLUME_START: u64 = 1_048_576;

    fn volume() -> MockVolume {
        MockVolume::ntfs(VOLUME_START, 4096 * 2048)
    }

    fn sector_of(cluster: u64) -> u64 {
        (VOLUME_START + cluster * 4096) / 512
    }

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("sectorscan").chain(args.iter().copied()))
    }

    #[test]
    fn test_rewrite_bad_free_cluster() {
        let mut volume = volume();
        volume.fail_read(700 * 4096, ERROR_CRC);
        let journal = volume.journal();
        let sector = sector_of(700).to_string();
        let cli = cli(&["C:", "--sector", &sector, "--yes"]);

        let mut output = Vec::new();
        run(volume, &cli, &mut "".as_bytes(), &mut output).unwrap();

        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("Cluster is not in use."));
        assert!(text.contains("Moved temp file from cluster 50 to cluster 700."));
        assert_eq!(journal.temp_cluster(), Some(700));
        assert_eq!(journal.calls().last(), Some(&MockCall::Close));
    }

    #[test]
    fn test_prompts_for_sector_and_confirmation() {
        let mut volume = volume();
        volume.fail_read(3 * 4096, ERROR_CRC);
        let journal = volume.journal();
        let cli = cli(&["c"]);

        let answers = format!("{}\nn\n", sector_of(3));
        let mut output = Vec::new();
        run(volume, &cli, &mut answers.as_bytes(), &mut output).unwrap();

        let text = String::from_utf8(output).unwrap();
        assert!(text.starts_with("Enter disk sector to query: "));
        assert!(text.ends_with(REWRITE_QUESTION));
        let calls = journal.calls();
        assert!(!calls.iter().any(|c| matches!(c, MockCall::CreateTemp(_))));
        assert_eq!(calls.last(), Some(&MockCall::Close));
    }

    #[test]
    fn test_readable_free_cluster_needs_force() {
        let sector = sector_of(9).to_string();

        let journal = {
            let volume = volume();
            let journal = volume.journal();
            let cli = cli(&["C", "--sector", &sector]);
            run(volume, &cli, &mut "".as_bytes(), &mut Vec::new()).unwrap();
            journal
        };
        assert!(!journal.calls().iter().any(|c| matches!(c, MockCall::CreateTemp(_))));

        let volume = volume();
        let journal = volume.journal();
        run(
            volume,
            &cli(&["C", "--sector", &sector, "--force", "--yes"]),
            &mut "".as_bytes(),
            &mut Vec::new(),
        )
        .unwrap();
        assert_eq!(journal.temp_cluster(), Some(9));
    }

    #[test]
    fn test_in_use_cluster_json_report() {
        let mut volume = volume();
        volume.add_owner(4, LOOKUP_STREAM_FLAG_DATA_ATTRIBUTE, "\\data\\movie.mkv");
        let sector = sector_of(4).to_string();

        let mut output = Vec::new();
        let cli = cli(&["C:", "--sector", &sector, "--json"]);
        run(volume, &cli, &mut "".as_bytes(), &mut output).unwrap();

        let json: serde_json::Value = serde_json::from_slice(&output).unwrap();
        assert_eq!(json["cluster"], 4);
        assert_eq!(json["status"]["state"], "in_use");
        assert_eq!(json["status"]["owners"]["matches"][0]["file_name"], "\\data\\movie.mkv");
    }

    #[test]
    fn test_bad_sector_input_is_reported_and_volume_closed() {
        let volume = volume();
        let journal = volume.journal();

        let result = run(volume, &cli(&["C:"]), &mut "not a number\n".as_bytes(), &mut Vec::new());
        assert!(result.is_err());
        assert_eq!(journal.calls().last(), Some(&MockCall::Close));
        assert!(report_outcome(result).is_ok());
    }

    #[test]
    fn test_fatal_errors_propagate() {
        let mut volume = volume();
        volume.fail_read(0, 1117);

        let sector = sector_of(0).to_string();
        let cli = cli(&["C:", "--sector", &sector]);
        let result = run(volume, &cli, &mut "".as_bytes(), &mut Vec::new());
        assert!(report_outcome(result).is_err());
    }

    #[test]
    fn test_failed_rewrite_keeps_underlying_error() {
        let mut volume = volume();
        volume.fail_read(700 * 4096, ERROR_CRC);
        volume.create_temp_status = Some(5);
        let journal = volume.journal();
        let sector = sector_of(700).to_string();

        let cli = cli(&["C:", "--sector", &sector, "--yes"]);
        let err = run(volume, &cli, &mut "".as_bytes(), &mut Vec::new()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SectorScanError>(),
            Some(SectorScanError::Os { operation: "CreateFileW", code: 5, .. })
        ));
        assert_eq!(journal.calls().last(), Some(&MockCall::Close));
    }
}
