//! Programa de ejemplo para trabajos batch: imprime `Demo i/N-1` una vez por
//! segundo. El scheduler simula exactamente esta salida para `demo N`, y
//! el binario sirve para usarlo como comando real dentro de pipelines.

use anyhow::{bail, Context, Result};
use std::{
    io::{self, Write},
    thread,
    time::Duration,
};

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    eprintln!("Demo started with argc={}", args.len());
    for (i, arg) in args.iter().enumerate() {
        eprintln!("argv[{}]={}", i, arg);
    }

    if args.len() != 2 {
        let program = args.first().map(String::as_str).unwrap_or("demo");
        eprintln!("Usage: {} <total_iterations>", program);
        std::process::exit(1);
    }

    let total: i64 = args[1]
        .parse()
        .with_context(|| format!("iteraciones inválidas: {}", args[1]))?;
    eprintln!("Parsed total_iterations={}", total);

    if total <= 0 {
        bail!("Total iterations must be positive");
    }

    let mut stdout = io::stdout();
    for i in 0..total {
        writeln!(stdout, "Demo {}/{}", i, total - 1)?;
        // que la salida llegue al pipe en cada iteración
        stdout.flush()?;
        thread::sleep(Duration::from_secs(1));
    }

    Ok(())
}
