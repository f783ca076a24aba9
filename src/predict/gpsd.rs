//! Minimal gpsd client: connect, issue a WATCH command, and read
//! newline-delimited TPV reports until a 2D or 3D fix appears.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::predict::types::Location;

#[derive(Debug, Error)]
pub enum GpsdError {
    #[error("gpsd I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("gpsd: no fix obtained before stream end")]
    NoFix,
    #[error("gpsd: timed out after {0:?}")]
    Timeout(Duration),
}

/// The subset of a gpsd TPV JSON object we need.
#[derive(Debug, Deserialize)]
struct TpvReport {
    #[serde(default)]
    class: String,
    #[serde(default)]
    mode: i32,
    #[serde(default)]
    lat: f64,
    #[serde(default)]
    lon: f64,
    #[serde(default, rename = "altMSL")]
    alt: f64,
}

/// Query gpsd at `addr` for a position fix. The whole exchange (connect,
/// watch, read) is bounded by `timeout`.
pub async fn location_from_gpsd(addr: &str, timeout: Duration) -> Result<Location, GpsdError> {
    tokio::time::timeout(timeout, query(addr))
        .await
        .map_err(|_| GpsdError::Timeout(timeout))?
}

async fn query(addr: &str) -> Result<Location, GpsdError> {
    let mut stream = TcpStream::connect(addr).await?;
    stream
        .write_all(br#"?WATCH={"enable":true,"json":true};"#)
        .await?;

    let mut lines = BufReader::new(stream).lines();
    while let Some(line) = lines.next_line().await? {
        let Ok(report) = serde_json::from_str::<TpvReport>(&line) else {
            continue;
        };
        if report.class != "TPV" {
            continue;
        }
        if report.mode >= 2 {
            return Ok(Location {
                lat: report.lat,
                lon: report.lon,
                alt: report.alt,
            });
        }
    }

    Err(GpsdError::NoFix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn unreachable_daemon_errors_quickly() {
        let result = location_from_gpsd("127.0.0.1:1", Duration::from_secs(2)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn reads_until_fix() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let _ = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 128];
            let _ = sock.read(&mut buf).await.unwrap();
            sock.write_all(
                b"{\"class\":\"VERSION\",\"release\":\"3.25\"}\n\
{\"class\":\"TPV\",\"mode\":1}\n\
{\"class\":\"TPV\",\"mode\":3,\"lat\":34.5794,\"lon\":-118.1165,\"altMSL\":781.0}\n",
            )
            .await
            .unwrap();
        });

        let loc = location_from_gpsd(&addr.to_string(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!((loc.lat - 34.5794).abs() < 1e-9);
        assert!((loc.lon + 118.1165).abs() < 1e-9);
        assert!((loc.alt - 781.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn stream_end_without_fix_is_no_fix() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let _ = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 128];
            let _ = sock.read(&mut buf).await.unwrap();
            sock.write_all(b"{\"class\":\"TPV\",\"mode\":0}\n").await.unwrap();
        });

        let result = location_from_gpsd(&addr.to_string(), Duration::from_secs(5)).await;
        assert!(matches!(result, Err(GpsdError::NoFix)));
    }
}
