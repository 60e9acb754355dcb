use std::env;

use atty::Stream;
use chrono::{DateTime, Local};
use owo_colors::OwoColorize;
use sysinfo::System;

/// Полный баннер с информацией о брокере.
pub const ASCII_FULL: &str = r#"
    pingpong broker {version}
    ----------------------------------------------
    Mode:             {mode}
    Listening:        {listen}
    Responder:        {responder}
    PID:              {pid}
    Host:             {host}
    OS/Arch:          {os}/{arch}
    CPU(s):           {cpus}
    Memory:           {mem_value} {mem_unit}
    Git:              {git}
    Build:            {git} ({build_time})
"#;

/// Компактный баннер для вывода.
pub const ASCII_COMPACT: &str = r#"
pingpong broker {version} - {mode} - {listen} - PID {pid}
"#;

/// Значения, подставляемые в шаблон баннера.
#[derive(Debug, Clone)]
pub struct BannerInfo {
    pub version: String,
    pub mode: &'static str,
    pub listen: String,
    pub responder: String,
    pub pid: u32,
    pub host: String,
    pub cpus: usize,
    pub mem_value: f64,
    pub mem_unit: &'static str,
    pub git: &'static str,
    pub build_time: String,
}

impl BannerInfo {
    /// Собирает метаданные процесса и сборки.
    pub fn collect(
        listen: &str,
        responder: &str,
    ) -> Self {
        let version = env!("CARGO_PKG_VERSION");
        // добавляем разрядность (32/64-bit) к версии
        let bits = std::mem::size_of::<usize>() * 8;

        let mut sys = System::new();
        sys.refresh_memory();

        // Расчет памяти
        let mem_total_mb = sys.total_memory() as f64 / 1024.0 / 1024.0;
        let mem_total_gb = mem_total_mb / 1024.0;
        let (mem_value, mem_unit) = if mem_total_gb >= 1.0 {
            (mem_total_gb, "GB")
        } else {
            (mem_total_mb, "MB")
        };

        let build_time_raw = option_env!("BUILD_TIME").unwrap_or("unknown");
        let build_time = if let Ok(dt) = DateTime::parse_from_rfc3339(build_time_raw) {
            dt.with_timezone(&Local)
                .format("%d.%m.%Y %H:%M:%S")
                .to_string()
        } else {
            build_time_raw.to_string()
        };

        Self {
            version: format!("{version} ({bits}-bit)"),
            mode: if cfg!(debug_assertions) {
                "debug"
            } else {
                "release"
            },
            listen: listen.to_string(),
            responder: responder.to_string(),
            pid: std::process::id(),
            host: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".into()),
            cpus: num_cpus::get(),
            mem_value,
            mem_unit,
            git: option_env!("GIT_COMMIT").unwrap_or("unknown"),
            build_time,
        }
    }
}

/// Подставляет значения в шаблон баннера.
pub fn render_banner(
    info: &BannerInfo,
    full: bool,
) -> String {
    let template = if full { ASCII_FULL } else { ASCII_COMPACT };
    template
        .replace("{version}", &info.version)
        .replace("{mode}", info.mode)
        .replace("{listen}", &info.listen)
        .replace("{responder}", &info.responder)
        .replace("{pid}", &info.pid.to_string())
        .replace("{host}", &info.host)
        .replace("{os}", std::env::consts::OS)
        .replace("{arch}", std::env::consts::ARCH)
        .replace("{cpus}", &info.cpus.to_string())
        .replace("{mem_value}", &format!("{:.1}", info.mem_value))
        .replace("{mem_unit}", info.mem_unit)
        .replace("{git}", info.git)
        .replace("{build_time}", &info.build_time)
}

/// Вывод баннера брокера.
///
/// Режим задаётся переменной `PINGPONG_BANNER` (`full`/`compact`), по
/// умолчанию полный в debug-сборке и компактный в release.
pub fn print_banner(
    listen: &str,
    responder: &str,
) {
    let forced = env::var("PINGPONG_BANNER").ok();
    let full = match forced.as_deref() {
        Some("full") => true,
        Some("compact") => false,
        _ => cfg!(debug_assertions),
    };

    let info = BannerInfo::collect(listen, responder);
    let s = render_banner(&info, full);
    let color = atty::is(Stream::Stdout);

    if !color {
        println!("{s}");
    } else if full {
        for (i, line) in s.lines().enumerate() {
            if i == 1 {
                println!("{}", line.bold().bright_blue());
            } else if line.trim_start().starts_with("Mode:") {
                println!("{}", line.replace(info.mode, &info.mode.cyan().to_string()));
            } else if line.trim_start().starts_with("PID:") {
                let pid = info.pid.to_string();
                println!("{}", line.replace(&pid, &pid.magenta().to_string()));
            } else if line.trim_start().starts_with("Git:")
                || line.trim_start().starts_with("Build:")
            {
                println!("{}", line.dimmed());
            } else {
                println!("{line}");
            }
        }
    } else {
        println!("{}", s.bold().green());
    }
    println!();
}

/// Лог запуска брокера с точностью до миллисекунд.
pub fn print_startup_log() {
    let pid = std::process::id();
    let ts = Local::now().format("%d %b %Y %H:%M:%S%.3f");

    if atty::is(Stream::Stdout) {
        println!(
            "[{}] {} {} {}",
            pid.to_string().red(),
            ts.to_string().white(),
            "# Broker started, pingpong version".dimmed().bold(),
            env!("CARGO_PKG_VERSION").dimmed().bold()
        );
        println!(
            "[{}] {} {}",
            pid.to_string().red(),
            ts.to_string().white(),
            "* Ready to accept connections".green()
        );
    } else {
        println!(
            "[{}] {} # Broker started, pingpong version {}",
            pid,
            ts,
            env!("CARGO_PKG_VERSION")
        );
        println!("[{pid}] {ts} * Ready to accept connections");
    }
}
