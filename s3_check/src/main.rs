use clap::{Parser, Subcommand};
use log::{error, info};
use s3_check::environment::{Firmware, HostEnvironment};
use s3_check::host::{DevMem, EfiVarFs, RtcWake};
use s3_check::listing::write_listing;
use s3_check::orchestrator::{read_boot_script, read_structure_address, NOT_APPLICABLE_EXIT_CODE};
use s3_check::{ExploitConfig, ExploitTest, PayloadImage, Verdict};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// JSON configuration, command line flags take precedence
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
enum Cmd {
    /// Run the boot script exploit test, suspends the machine
    Check {
        /// Write a JSON report of the run
        #[arg(short, long)]
        report: Option<PathBuf>,
        /// Externally assembled payload
        #[arg(short, long, requires = "data_slot_offset")]
        payload: Option<PathBuf>,
        /// Offset of the 0xff data slot sentinel within the payload
        #[arg(short, long, value_parser = parse_number)]
        data_slot_offset: Option<usize>,
        /// Seconds until the RTC wakes the machine again
        #[arg(short, long)]
        wake_after: Option<u64>,
    },
    /// Print the boot script
    Dump {
        /// Raw boot script file instead of the live table
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
    /// Print what is known about the host
    Env,
}

fn parse_number(text: &str) -> Result<usize, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| format!("invalid number {:?}: {}", text, e))
}

/// Exit code for a host the test does not apply to.
fn preflight(firmware: Firmware) -> Option<i32> {
    match firmware {
        Firmware::LegacyBios => {
            println!("You are using legacy BIOS, not UEFI. Your system is not vulnerable");
            Some(NOT_APPLICABLE_EXIT_CODE)
        }
        Firmware::Uefi => None,
    }
}

fn check(config: ExploitConfig, report: Option<PathBuf>) -> i32 {
    let environment = HostEnvironment::probe();
    println!("{}", environment);

    if let Some(code) = preflight(environment.firmware) {
        return code;
    }
    println!("Performing the firmware check");

    let payload = match PayloadImage::from_config(&config) {
        Ok(payload) => payload,
        Err(e) => {
            error!("Failed to prepare the payload: {}", e);
            return Verdict::Error.exit_code();
        }
    };
    let memory = match DevMem::open(&config.dev_mem) {
        Ok(memory) => memory,
        Err(e) => {
            error!("Failed to open {}: {}", config.dev_mem.display(), e);
            return Verdict::Error.exit_code();
        }
    };
    let variables = EfiVarFs::new(&config.efivars);
    let trigger = RtcWake::new(Duration::from_secs(config.settle_delay_secs));

    let mut test = ExploitTest::new(config, payload, memory, variables, trigger);
    let verdict = test.run();
    match verdict {
        Verdict::Passed => println!("Your system is NOT VULNERABLE"),
        Verdict::Failed => println!("Your system is VULNERABLE"),
        Verdict::Error => println!("The exploit test could not be completed"),
    }

    if let Some(path) = report {
        let mut report = test.into_report();
        report.environment = Some(environment);
        match report.save(&path) {
            Ok(()) => info!("Saved the report to {:?}", path),
            Err(e) => error!("Failed to save the report: {:?}", e),
        }
    }

    verdict.exit_code()
}

fn dump(config: &ExploitConfig, input: Option<PathBuf>) -> i32 {
    let script = match input {
        Some(path) => std::fs::read(&path).map(|data| (None, data)).map_err(|e| {
            format!("Failed to read {}: {}", path.display(), e)
        }),
        None => DevMem::open(&config.dev_mem)
            .map_err(|e| format!("Failed to open {}: {}", config.dev_mem.display(), e))
            .and_then(|mut memory| {
                let mut variables = EfiVarFs::new(&config.efivars);
                read_structure_address(config, &mut variables)
                    .and_then(|structure| read_boot_script(config, &mut memory, structure))
                    .map(|script| (Some(script.address), script.data))
                    .map_err(|e| e.to_string())
            }),
    };

    let (address, data) = match script {
        Ok(script) => script,
        Err(e) => {
            error!("{}", e);
            return 2;
        }
    };

    let stdout = std::io::stdout();
    match write_listing(&mut stdout.lock(), &data, address) {
        Ok(_) => 0,
        Err(e) => {
            error!("{}", e);
            2
        }
    }
}

fn main() {
    env_logger::init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ExploitConfig::from_file(path).unwrap_or_else(|e| {
            eprintln!("Failed to load the configuration: {:?}", e);
            std::process::exit(2)
        }),
        None => ExploitConfig::default(),
    };

    let code = match args.cmd {
        Cmd::Check {
            report,
            payload,
            data_slot_offset,
            wake_after,
        } => {
            if payload.is_some() {
                config.payload = payload;
                config.data_slot_offset = data_slot_offset;
            }
            if let Some(wake_after) = wake_after {
                config.wake_after_secs = wake_after;
            }
            check(config, report)
        }
        Cmd::Dump { input } => dump(&config, input),
        Cmd::Env => {
            println!("{}", HostEnvironment::probe());
            0
        }
    };

    std::process::exit(code);
}
