// ===============================
// src/recorder.rs
// ===============================
//
// Recorder JSONL ringan untuk audit pasar:
// - setiap Event (chat, deal, refresh) di-append ke file .jsonl
// - BufWriter + flush periodik 1s / tiap 1000 event
// - parent directory dibuat otomatis; tulis gagal -> reopen, coba sekali lagi
//
// Aktif kalau ENV RECORD_FILE di-set (lihat main.rs).
//
use std::path::Path;
use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info};

use crate::domain::Event;

const FLUSH_EVERY_N_EVENTS: u32 = 1000;

async fn open_writer(path: &str) -> Option<BufWriter<tokio::fs::File>> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = fs::create_dir_all(parent).await {
                error!(?e, %path, "recorder: create_dir_all failed");
            }
        }
    }
    match OpenOptions::new().create(true).append(true).open(path).await {
        Ok(file) => Some(BufWriter::new(file)),
        Err(e) => {
            error!(?e, %path, "recorder: open failed");
            None
        }
    }
}

/// Tulis satu baris; kalau gagal, reopen file dan ulangi sekali.
async fn write_line(writer: &mut BufWriter<tokio::fs::File>, path: &str, line: &str) {
    let payload = format!("{line}\n");
    if writer.write_all(payload.as_bytes()).await.is_ok() {
        return;
    }
    error!(%path, "recorder: write failed, reopening");
    if let Some(w) = open_writer(path).await {
        *writer = w;
        if let Err(e) = writer.write_all(payload.as_bytes()).await {
            error!(?e, "recorder: write failed again after reopen, drop event");
        }
    }
}

pub async fn run(mut rx: mpsc::Receiver<Event>, path: String) {
    info!(%path, "recorder: started");
    let Some(mut writer) = open_writer(&path).await else {
        error!(%path, "recorder: disabled, could not open file");
        return;
    };

    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut since_last_flush: u32 = 0;

    loop {
        tokio::select! {
            maybe_ev = rx.recv() => {
                match maybe_ev {
                    Some(ev) => {
                        let line = match serde_json::to_string(&ev) {
                            Ok(s) => s,
                            Err(e) => {
                                error!(?e, "recorder: serialize error, skip event");
                                continue;
                            }
                        };
                        write_line(&mut writer, &path, &line).await;

                        since_last_flush += 1;
                        if since_last_flush >= FLUSH_EVERY_N_EVENTS {
                            let _ = writer.flush().await;
                            since_last_flush = 0;
                        }
                    }
                    None => {
                        // channel ditutup: flush lalu berhenti
                        let _ = writer.flush().await;
                        info!("recorder: channel closed, stopped");
                        break;
                    }
                }
            }

            _ = tick.tick() => {
                let _ = writer.flush().await;
                since_last_flush = 0;
            }
        }
    }
}
