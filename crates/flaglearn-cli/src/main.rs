//! Command-line flag learner.
//!
//! Probes one instruction across a generated input space on the host CPU
//! and prints deduplicated `ax_test![...]` fixtures to stdout. Diagnostics
//! go to stderr so the fixture stream stays pipeable.

mod render;

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing_subscriber::EnvFilter;

use flaglearn_engine::{learn, LearnOptions, DEFAULT_CAP};
use flaglearn_harness::Toolchain;
use flaglearn_probe::{permute_with_flags, value_sets, Flags};
use flaglearn_x86::{parse_operand, Instruction};

/// Learn an x86-64 instruction's flag behavior by executing it natively,
/// and emit emulator test fixtures.
#[derive(Parser, Debug)]
#[command(name = "flaglearn", version)]
struct Args {
    /// Status flags to observe, comma-separated (e.g. `CF,ZF`); all five by default
    #[arg(long, value_name = "FLAGS")]
    observe: Option<String>,

    /// Precondition flags to permute across their power set before each probe
    #[arg(long, value_name = "FLAGS")]
    permute: Option<String>,

    /// Implicit operands to supply and observe, comma-separated (e.g. `rax,rdx`)
    #[arg(long, value_name = "OPERANDS")]
    implicit: Option<String>,

    /// Keep every successful probe instead of deduplicating by flag outcome
    #[arg(long)]
    result_only: bool,

    /// Fold all of 0..256 into the value catalog (implied for instructions
    /// with fewer than 2 dynamic operands)
    #[arg(long)]
    extended: bool,

    /// Seed for reproducible random values and sampling
    #[arg(long)]
    seed: Option<u64>,

    /// Worker pool size; defaults to four workers per CPU core
    #[arg(long)]
    jobs: Option<usize>,

    /// Per-probe wall-clock timeout in seconds
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,

    /// Emit a jump fixture instead: treat the instruction text as the
    /// initial code block and insert this many nop bytes before the final
    /// block
    #[arg(long, value_name = "COUNT", requires = "jump_final")]
    jump: Option<usize>,

    /// Final code block of a jump fixture (labels allowed, but it must not
    /// end with one)
    #[arg(long, value_name = "CODE", requires = "jump")]
    jump_final: Option<String>,

    /// How much scaffolding the jump fixture carries
    #[arg(long, value_enum, default_value = "bare")]
    jump_style: render::JumpStyle,

    /// The instruction to probe, in Intel syntax (remaining arguments are
    /// joined, so quoting is optional: `flaglearn add rax, rbx`)
    #[arg(trailing_var_arg = true, required = true)]
    instruction: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let text = args.instruction.join(" ");

    let observed = match &args.observe {
        Some(list) => Flags::parse_list(list)?,
        None => Flags::all(),
    };

    if let Some(padding) = args.jump {
        return run_jump(&args, &text, padding, observed);
    }

    let mut instruction =
        Instruction::parse(&text).with_context(|| format!("cannot parse `{text}`"))?;

    if let Some(implicit) = &args.implicit {
        let mut operands = Vec::new();
        for part in implicit.split(',') {
            operands.push(
                parse_operand(part.trim(), None)
                    .with_context(|| format!("cannot parse implicit operand `{part}`"))?,
            );
        }
        instruction = instruction.with_implicit(operands)?;
    }

    let permute = match &args.permute {
        Some(list) => Flags::parse_list(list)?,
        None => Flags::empty(),
    };

    if !Toolchain::available() {
        bail!("`as` and `gcc` must be on PATH");
    }
    let toolchain = Toolchain::detect().with_timeout(Duration::from_secs(args.timeout_secs));

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let arity = instruction.dynamic_operands().len();
    let extended = args.extended || arity < 2;
    let sets = value_sets(arity, extended, &mut rng)?;
    let inputs = permute_with_flags(sets, permute);
    tracing::info!(%instruction, inputs = inputs.len(), "generated input space");

    let options = LearnOptions {
        observed,
        result_only: args.result_only,
        cap: DEFAULT_CAP,
        jobs: args.jobs,
    };
    let synthesis = learn(&toolchain, &instruction, &inputs, &options, &mut rng)?;

    // Ids can collide once sanitized (e.g. differing only in punctuation);
    // disambiguate with a numeric suffix so every fixture name is unique.
    let mut taken: HashSet<String> = HashSet::new();
    let mut blocks = Vec::with_capacity(synthesis.cases.len());
    for case in &synthesis.cases {
        let base = case.id();
        let mut id = base.clone();
        let mut suffix = 1usize;
        while !taken.insert(id.clone()) {
            id = format!("{base}_{suffix}");
            suffix += 1;
        }
        blocks.push(render::render(case, &id)?);
    }

    println!("{}", blocks.join("\n\n"));

    tracing::info!(
        cases = blocks.len(),
        probed = synthesis.probed,
        failures = synthesis.failures,
        "done"
    );
    if synthesis.truncated {
        tracing::warn!("kept a uniform sample of {DEFAULT_CAP} cases; rerun with --observe or --permute narrowed to see the rest");
    }
    Ok(())
}

/// The jump path: one probe, one fixture. The code blocks are passed to the
/// assembler verbatim, so multi-instruction blocks (`;`-separated) and
/// labels work.
fn run_jump(args: &Args, initial: &str, padding: usize, observed: Flags) -> anyhow::Result<()> {
    if padding == 0 {
        bail!("--jump needs at least 1 byte of padding");
    }
    let Some(final_code) = args.jump_final.as_deref() else {
        bail!("--jump requires --jump-final");
    };
    if final_code.trim_end().ends_with(':') {
        bail!("the final block cannot end with a label; append e.g. a nop");
    }

    if !Toolchain::available() {
        bail!("`as` and `gcc` must be on PATH");
    }
    let toolchain = Toolchain::detect().with_timeout(Duration::from_secs(args.timeout_secs));

    let case = flaglearn_engine::probe_jump(&toolchain, initial, padding, final_code, observed)?;
    println!("{}", render::render_jump(&case, &case.id(), args.jump_style));
    Ok(())
}
