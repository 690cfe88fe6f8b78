use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter};
use std::ops::Range;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use germcall::genomics::BaseCall;
use germcall::indel::ReadPathScores;
use germcall::pipeline::VcfSink;
use germcall::{
    AlleleKey, CallerConfig, CallingMode, PipelineBuilder, ReferenceSegment, RegionPloidy,
    StreamDriver,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "germcall", about = "Streaming germline SNV and indel caller")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    /// Diploid/haploid genotype likelihood model.
    Diploid,
    /// Allele-frequency reporting.
    Continuous,
}

impl From<Mode> for CallingMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Diploid => CallingMode::Diploid,
            Mode::Continuous => CallingMode::Continuous,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Call variants from an evidence file and write VCF to stdout.
    Call {
        /// Reference sequence (plain FASTA or raw sequence).
        reference: PathBuf,
        /// Evidence file: base calls, indel read scores, forced alleles and sites.
        evidence: PathBuf,
        /// Chromosome name.
        #[arg(long, default_value = "chr1")]
        chrom: String,
        /// Calling model.
        #[arg(long, value_enum, default_value_t = Mode::Diploid)]
        mode: Mode,
        /// Haploid region as `start-end` (0-based, half-open); repeatable.
        #[arg(long, value_parser = parse_region)]
        haploid: Vec<Range<u32>>,
        /// Write per-position base counts to this file.
        #[arg(long)]
        counts: Option<PathBuf>,
        /// Minimum GQX before the LowGQX filter applies.
        #[arg(long, default_value_t = 15)]
        min_gqx: u32,
        /// Depth above which the HighDepth filter applies.
        #[arg(long)]
        max_depth: Option<u32>,
        /// Filtered basecall fraction above which HighBaseFilt applies.
        #[arg(long, default_value_t = 0.4)]
        max_base_filt: f64,
        /// SNV homopolymer length above which HighSNVHPOL applies.
        #[arg(long, default_value_t = 6)]
        max_snv_hpol: u32,
        /// SNV strand bias above which HighSNVSB applies.
        #[arg(long, default_value_t = 10.0)]
        max_snv_sb: f64,
        /// Report positions without coverage.
        #[arg(long)]
        all_sites: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Call {
            reference,
            evidence,
            chrom,
            mode,
            haploid,
            counts,
            min_gqx,
            max_depth,
            max_base_filt,
            max_snv_hpol,
            max_snv_sb,
            all_sites,
        } => {
            let config = CallerConfig::default()
                .with_mode(mode.into())
                .with_min_gqx(Some(min_gqx))
                .with_max_depth(max_depth)
                .with_site_filters(Some(max_base_filt), Some(max_snv_hpol), Some(max_snv_sb));
            run_call(CallOptions {
                reference,
                evidence,
                chrom,
                haploid,
                counts,
                all_sites,
                config,
            })?
        }
    }

    Ok(())
}

struct CallOptions {
    reference: PathBuf,
    evidence: PathBuf,
    chrom: String,
    haploid: Vec<Range<u32>>,
    counts: Option<PathBuf>,
    all_sites: bool,
    config: CallerConfig,
}

fn run_call(options: CallOptions) -> Result<()> {
    let sequence = read_sequence_file(&options.reference).with_context(|| {
        format!("failed to read reference from {}", options.reference.display())
    })?;
    let reference = ReferenceSegment::new(options.chrom, 0, sequence);
    let region = reference.range();

    let mut ploidy = RegionPloidy::diploid();
    for range in options.haploid {
        ploidy = ploidy.with_region(range, 1)?;
    }

    let mut driver = StreamDriver::new(options.config.clone(), reference.clone(), ploidy)
        .context("failed to initialize caller")?;
    if let Some(path) = &options.counts {
        let file = File::create(path)
            .with_context(|| format!("failed to create counts file {}", path.display()))?;
        driver = driver.with_counts_writer(BufWriter::new(file));
    }
    driver.set_traversal_hold(options.all_sites);

    load_evidence(&options.evidence, &mut driver, &reference)
        .with_context(|| format!("failed to load evidence from {}", options.evidence.display()))?;

    let stdout = io::stdout();
    let sink = VcfSink::new(BufWriter::new(stdout.lock()), reference);
    let mut pipeline = PipelineBuilder::new(&options.config).build(sink);
    driver
        .run(region, &mut pipeline)
        .context("variant calling failed")?;

    tracing::info!(records = pipeline.sink().records_written(), "calling finished");
    Ok(())
}

fn parse_region(value: &str) -> std::result::Result<Range<u32>, String> {
    let (start, end) = value
        .split_once('-')
        .ok_or_else(|| format!("expected start-end, got '{value}'"))?;
    let start: u32 = start.parse().map_err(|e| format!("invalid start '{start}': {e}"))?;
    let end: u32 = end.parse().map_err(|e| format!("invalid end '{end}': {e}"))?;
    if end <= start {
        return Err(format!("empty region '{value}'"));
    }
    Ok(start..end)
}

fn read_sequence_file(path: &Path) -> Result<Vec<u8>> {
    let contents = std::fs::read_to_string(path)?;
    let sequence: String = contents
        .lines()
        .filter(|line| !line.starts_with('>') && !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("");
    Ok(sequence.trim().to_ascii_uppercase().into_bytes())
}

/// Parse the evidence file into the driver's session.
///
/// Lines are whitespace separated; `#` starts a comment.
///
/// ```text
/// B <pos> <base> <qual> <mapq>                        base call
/// I <pos> DEL <len>|INS <seq> <read> <ref_lnp> <alt_lnp>   indel read scores
/// F <pos> DEL <len>|INS <seq>                         forced allele
/// S <pos>                                             forced site
/// R <span>                                            read indel span
/// ```
fn load_evidence(
    path: &Path,
    driver: &mut StreamDriver<RegionPloidy>,
    reference: &ReferenceSegment,
) -> Result<()> {
    let reader = BufReader::new(File::open(path)?);

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let line_no = line_no + 1;
        let session = driver.session_mut();

        match fields.as_slice() {
            ["B", pos, base, qual, mapq] => {
                let pos: u32 = parse_field(pos, "position", line_no)?;
                let base = base
                    .bytes()
                    .next()
                    .ok_or_else(|| anyhow!("missing base on line {line_no}"))?;
                let call = BaseCall::new(
                    base.to_ascii_uppercase(),
                    parse_field(qual, "quality", line_no)?,
                    parse_field(mapq, "mapping quality", line_no)?,
                    false,
                );
                session
                    .pileups_mut()
                    .observe(0, pos, reference.base(pos), call)?;
            }
            ["I", pos, kind, value, read, ref_lnp, alt_lnp] => {
                let key = parse_allele(pos, kind, value, line_no)?;
                let scores = ReadPathScores::new(
                    parse_field(ref_lnp, "reference score", line_no)?,
                    parse_field(alt_lnp, "allele score", line_no)?,
                );
                let read = parse_field(read, "read id", line_no)?;
                session.indel_buffer_mut().observe(key, 0, read, scores)?;
            }
            ["F", pos, kind, value] => {
                let key = parse_allele(pos, kind, value, line_no)?;
                session.add_forced_allele(key);
            }
            ["S", pos] => {
                session.add_forced_site(parse_field(pos, "position", line_no)?);
            }
            ["R", span] => {
                session
                    .indel_buffer_mut()
                    .note_read_indel_span(parse_field(span, "span", line_no)?);
            }
            _ => bail!("unrecognized evidence record on line {line_no}: '{line}'"),
        }
    }

    Ok(())
}

fn parse_allele(pos: &str, kind: &str, value: &str, line_no: usize) -> Result<AlleleKey> {
    let pos: u32 = parse_field(pos, "position", line_no)?;
    match kind {
        "DEL" => Ok(AlleleKey::deletion(pos, parse_field(value, "deletion length", line_no)?)),
        "INS" => Ok(AlleleKey::insertion(pos, value.as_bytes())),
        other => bail!("unknown indel kind '{other}' on line {line_no}"),
    }
}

fn parse_field<T>(value: &str, what: &str, line_no: usize) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("invalid {what} '{value}' on line {line_no}"))
}
