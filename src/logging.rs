//! Process-wide logging setup. The appliance has no GUI or IPC bridge to
//! surface logs through (unlike the teacher's Tauri-coupled `logging.rs`),
//! so this uses a plain `env_logger` format instead: a custom line with a
//! local timestamp, level, and target, controlled by `RUST_LOG`.

use std::io::Write;

use chrono::Local;
use env_logger::Builder;
use log::LevelFilter;

pub fn init() {
    let mut builder = Builder::new();
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .filter_level(LevelFilter::Info);

    if let Ok(value) = std::env::var("RUST_LOG") {
        builder.parse_filters(&value);
    }

    let _ = builder.try_init();
}
