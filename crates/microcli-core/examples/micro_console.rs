//! MicroCLI Console
//!
//! Interactive console for MicroCLI firmware. Replies, unsolicited output and
//! PWM measurements are printed as they arrive.
//!
//! Usage:
//!   cargo run --example micro_console -- [OPTIONS] [PORT]
//!
//! Options:
//!   --port PORT       Serial port (default: first port found)
//!   --baud RATE       Baud rate (default: 9600)
//!   --config FILE     Load serial settings from a JSON file
//!   --list            List serial ports and exit
//!
//! Console commands:
//!   ping | version | help | heap | ticks | clk | stats | rtc
//!   pin <bank> <pin> <0|1>      drive a GPIO pin
//!   read <bank> <pin>           read a GPIO pin
//!   rtc-set <hh> <mm> <ss>      set the RTC
//!   pwm <freq> <duty>           set PWM frequency and duty cycle
//!   monitor <channel> | stop    start or stop PWM monitoring
//!   raw <text>                  send a line as is
//!   quit

use anyhow::{bail, Context, Result};
use microcli_core::prelude::*;
use microcli_core::protocol::list_ports;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Prints events straight to the terminal
struct PrintSink;

impl EventSink for PrintSink {
    fn on_line(&self, line: &str) {
        println!("  < {}", line);
    }

    fn on_telemetry_sample(&self, _high: bool) {}

    fn on_frequency_measured(&self, hz: f64) {
        println!("  ~ {:.2} Hz", hz);
    }

    fn on_connection_state_changed(&self, state: LinkState) {
        println!("  * link {:?}", state);
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut settings = SerialSettings::default();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                if i < args.len() {
                    settings.port_name = args[i].clone();
                }
            }
            "--baud" | "-b" => {
                i += 1;
                if i < args.len() {
                    let rate: u32 = args[i].parse().context("baud rate must be a number")?;
                    settings.baud_rate = BaudRate::try_from(rate)?;
                }
            }
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    let port_name = std::mem::take(&mut settings.port_name);
                    settings = SerialSettings::load(&args[i])
                        .with_context(|| format!("failed to load {}", args[i]))?;
                    if !port_name.is_empty() {
                        settings.port_name = port_name;
                    }
                }
            }
            "--list" | "-l" => {
                for port in list_ports() {
                    println!("{:<20} {}", port.name, port.description);
                }
                return Ok(());
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            arg if !arg.starts_with('-') => {
                settings.port_name = arg.to_string();
            }
            _ => {
                eprintln!("Unknown option: {}", args[i]);
            }
        }
        i += 1;
    }

    if settings.port_name.is_empty() {
        match list_ports().into_iter().next() {
            Some(port) => settings.port_name = port.name,
            None => bail!("no serial ports found, pass one with --port"),
        }
    }

    println!("Opening {} at {} baud...", settings.port_name, settings.baud_rate);
    let mut conn = Connection::new(Arc::new(PrintSink));
    conn.open(&settings)?;

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&verb, rest)) = words.split_first() else {
            continue;
        };

        if verb == "quit" || verb == "exit" {
            break;
        }
        if let Err(e) = run_command(&mut conn, verb, rest, line.trim()) {
            eprintln!("  ! {}", e);
        }
    }

    conn.close()?;
    Ok(())
}

fn run_command(conn: &mut Connection, verb: &str, args: &[&str], line: &str) -> Result<()> {
    let reply = match verb {
        "ping" => {
            println!("  {:?}", conn.ping()?);
            return Ok(());
        }
        "version" => conn.get_version()?,
        "help" => conn.help()?,
        "heap" => conn.get_heap()?,
        "ticks" => conn.get_ticks()?,
        "clk" => conn.get_clk()?,
        "stats" => conn.get_stats()?,
        "rtc" => conn.get_rtc_time()?,
        "pin" => {
            let [bank, pin, level] = args else {
                bail!("usage: pin <bank> <pin> <0|1>");
            };
            conn.write_pin(bank.parse()?, pin.parse()?, *level == "1")?
        }
        "read" => {
            let [bank, pin] = args else {
                bail!("usage: read <bank> <pin>");
            };
            conn.read_pin(bank.parse()?, pin.parse()?)?
        }
        "rtc-set" => {
            let [h, m, s] = args else {
                bail!("usage: rtc-set <hh> <mm> <ss>");
            };
            conn.set_rtc_time(h.parse()?, m.parse()?, s.parse()?)?
        }
        "pwm" => {
            let [freq, duty] = args else {
                bail!("usage: pwm <freq> <duty>");
            };
            conn.set_pwm_freq_duty(freq.parse()?, duty.parse()?)?
        }
        "monitor" => {
            let [channel] = args else {
                bail!("usage: monitor <channel>");
            };
            conn.monitor_pwm(channel.parse()?)?;
            return Ok(());
        }
        "stop" => {
            conn.stop_monitor()?;
            return Ok(());
        }
        "raw" => {
            let text = line.strip_prefix("raw").unwrap_or(line).trim();
            conn.send_raw(text)?;
            return Ok(());
        }
        other => bail!("unknown command '{}', try --help", other),
    };

    match reply.wait() {
        Some(text) => println!("  {}", text),
        None => println!("  (no reply)"),
    }
    Ok(())
}

fn print_help() {
    println!("MicroCLI Console");
    println!();
    println!("Usage: micro_console [OPTIONS] [PORT]");
    println!();
    println!("Options:");
    println!("  --port, -p PORT     Serial port (default: first port found)");
    println!("  --baud, -b RATE     Baud rate (default: 9600)");
    println!("  --config, -c FILE   Load serial settings from a JSON file");
    println!("  --list, -l          List serial ports and exit");
    println!("  --help, -h          Show this help");
}
