use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use tracing::{Level, info, warn};

use irkbd::config::POWER_ON_DELAY_MS;
use irkbd::decoder::IR_BYTE_TIMEOUT_MS;
use irkbd::host::HOST_PARAMETER_TIMEOUT_MS;
use irkbd::logging::{setup_logging_file, setup_logging_stdio};
use irkbd::sim::{DEFAULT_BYTE_GAP_MS, IrScript, Simulation, parse_hex_bytes};
use irkbd::{ConverterConfig, Keymap};

/// Infrared keyboard to PS/2 converter
/// Runs the converter against a simulated PS/2 host
#[derive(Parser)]
#[command(name = "irkbd")]
#[command(about = "Infrared keyboard to PS/2 converter, on a simulated board")]
struct Args {
    /// Infrared bytes to deliver, parsed as hex
    #[arg(long, value_name = "HEX")]
    ir: Option<String>,

    /// Infrared script file (hex bytes, `wait N` lines)
    #[arg(long, value_name = "FILE", conflicts_with = "ir")]
    ir_file: Option<PathBuf>,

    /// Bytes the host sends after power on, parsed as hex
    #[arg(long, value_name = "HEX")]
    host: Option<String>,

    /// Gap between infrared bytes
    #[arg(long, default_value_t = DEFAULT_BYTE_GAP_MS)]
    byte_gap_ms: u32,

    /// Keymap file of `code=scancode` hex lines
    #[arg(long)]
    keymap: Option<PathBuf>,

    /// Idle time that ends an infrared pair
    #[arg(long, default_value_t = IR_BYTE_TIMEOUT_MS)]
    ir_timeout_ms: u32,

    /// Wait for the parameter of a two-byte host command
    #[arg(long, default_value_t = HOST_PARAMETER_TIMEOUT_MS)]
    host_timeout_ms: u32,

    /// Delay before the self test result is sent
    #[arg(long, default_value_t = POWER_ON_DELAY_MS)]
    power_on_delay_ms: u32,

    /// Give up if the board hasn't gone quiet after this long
    #[arg(long, default_value_t = 60_000)]
    limit_ms: u32,

    /// Write logs to a file instead of stdout
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let args = Args::parse();
    let level = if args.verbose {
        Level::TRACE
    } else {
        Level::INFO
    };
    match &args.log_file {
        Some(path) => setup_logging_file(level, path)?,
        None => setup_logging_stdio(level)?,
    }

    let config = ConverterConfig {
        ir_byte_timeout_ms: args.ir_timeout_ms,
        host_parameter_timeout_ms: args.host_timeout_ms,
        power_on_delay_ms: args.power_on_delay_ms,
        ..Default::default()
    };
    let keymap = match &args.keymap {
        Some(path) => {
            info!("Keymap file: {path:?}");
            Keymap::load(path)?
        }
        None => Keymap::default(),
    };
    let script = match (&args.ir, &args.ir_file) {
        (Some(hex), _) => IrScript::from_bytes(&parse_hex_bytes(hex)?, args.byte_gap_ms),
        (None, Some(path)) => IrScript::load(path, args.byte_gap_ms)?,
        (None, None) => IrScript::default(),
    };
    let host_bytes = match &args.host {
        Some(hex) => parse_hex_bytes(hex)?,
        None => vec![],
    };

    let timer = &config.timer;
    info!(
        "Bus clock {} Hz (reload {}, clock compare {}, data compare {})",
        timer.bus_clock_hz(),
        timer.reload(),
        timer.clock_compare(),
        timer.data_compare()
    );
    info!(
        "{} infrared bytes over {} ms",
        script.events().len(),
        script.duration_ms()
    );

    let sim = Simulation::new(&config);
    let mut converter = sim.converter(keymap);
    converter.power_on();

    sim.host_send(&host_bytes);
    sim.schedule_ir(&script);
    if !sim.run_until_quiet(&mut converter, args.limit_ms) {
        warn!("Board still busy after {} ms", args.limit_ms);
    }

    info!("Finished at {} ms", sim.now());
    for transfer in sim.transfers() {
        let status = if transfer.acked { "ack" } else { "no ack" };
        info!("Host  -> kbd: {:02X} ({status})", transfer.value);
    }
    info!("Kbd   -> host: {:02X?}", sim.received());
    for frame in sim.frames().iter().filter(|f| !f.is_valid()) {
        warn!("Bad frame: {frame:?}");
    }
    if sim.ir_dropped() > 0 {
        warn!("{} infrared bytes dropped", sim.ir_dropped());
    }
    info!("Lights: {:?}", sim.lights().current());

    Ok(())
}
