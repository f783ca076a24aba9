//! 44-byte RIFF/WAVE header handling for signed 16-bit LE mono PCM.

use std::io::{self, SeekFrom};

use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

pub const WAV_HEADER_LEN: u64 = 44;

const NUM_CHANNELS: u16 = 1;
const BITS_PER_SAMPLE: u16 = 16;
const AUDIO_FORMAT_PCM: u16 = 1;

/// Build the header bytes. Pass `data_size = 0` as a placeholder and call
/// [`finalize_wav_header`] once recording completes.
pub fn wav_header(sample_rate: u32, data_size: u32) -> [u8; WAV_HEADER_LEN as usize] {
    let byte_rate = sample_rate * u32::from(NUM_CHANNELS) * u32::from(BITS_PER_SAMPLE) / 8;
    let block_align = NUM_CHANNELS * BITS_PER_SAMPLE / 8;

    let mut h = [0u8; WAV_HEADER_LEN as usize];
    h[0..4].copy_from_slice(b"RIFF");
    h[4..8].copy_from_slice(&(36 + data_size).to_le_bytes());
    h[8..12].copy_from_slice(b"WAVE");
    h[12..16].copy_from_slice(b"fmt ");
    h[16..20].copy_from_slice(&16u32.to_le_bytes());
    h[20..22].copy_from_slice(&AUDIO_FORMAT_PCM.to_le_bytes());
    h[22..24].copy_from_slice(&NUM_CHANNELS.to_le_bytes());
    h[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    h[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    h[32..34].copy_from_slice(&block_align.to_le_bytes());
    h[34..36].copy_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    h[36..40].copy_from_slice(b"data");
    h[40..44].copy_from_slice(&data_size.to_le_bytes());
    h
}

/// Write a placeholder header at the current file position.
pub async fn write_wav_header(f: &mut File, sample_rate: u32) -> io::Result<()> {
    f.write_all(&wav_header(sample_rate, 0)).await
}

/// Patch the RIFF chunk size (offset 4) and data sub-chunk size (offset 40)
/// based on the actual file length.
pub async fn finalize_wav_header(f: &mut File) -> io::Result<()> {
    let file_size = f.metadata().await?.len();
    if file_size < WAV_HEADER_LEN {
        return Ok(());
    }

    let riff_size = (file_size - 8) as u32;
    let data_size = (file_size - WAV_HEADER_LEN) as u32;

    f.seek(SeekFrom::Start(4)).await?;
    f.write_all(&riff_size.to_le_bytes()).await?;
    f.seek(SeekFrom::Start(40)).await?;
    f.write_all(&data_size.to_le_bytes()).await?;
    f.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn header_layout() {
        let h = wav_header(48_000, 0);
        assert_eq!(&h[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(h[4..8].try_into().unwrap()), 36);
        assert_eq!(&h[8..12], b"WAVE");
        assert_eq!(&h[12..16], b"fmt ");
        // PCM, mono, 16-bit at 48 kHz.
        assert_eq!(u16::from_le_bytes(h[20..22].try_into().unwrap()), 1);
        assert_eq!(u16::from_le_bytes(h[22..24].try_into().unwrap()), 1);
        assert_eq!(u32::from_le_bytes(h[24..28].try_into().unwrap()), 48_000);
        assert_eq!(u32::from_le_bytes(h[28..32].try_into().unwrap()), 96_000);
        assert_eq!(u16::from_le_bytes(h[32..34].try_into().unwrap()), 2);
        assert_eq!(u16::from_le_bytes(h[34..36].try_into().unwrap()), 16);
        assert_eq!(&h[36..40], b"data");
        assert_eq!(u32::from_le_bytes(h[40..44].try_into().unwrap()), 0);
    }

    #[tokio::test]
    async fn finalize_patches_sizes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pass.wav");

        let mut f = File::create(&path).await.unwrap();
        write_wav_header(&mut f, 48_000).await.unwrap();
        f.write_all(&[0u8; 1000]).await.unwrap();
        finalize_wav_header(&mut f).await.unwrap();
        drop(f);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 1044);
        let riff = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let data = u32::from_le_bytes(bytes[40..44].try_into().unwrap());
        assert_eq!(riff, 1044 - 8);
        assert_eq!(data, 1044 - 44);
    }

    #[tokio::test]
    async fn finalize_on_header_only_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.wav");

        let mut f = File::create(&path).await.unwrap();
        write_wav_header(&mut f, 48_000).await.unwrap();
        finalize_wav_header(&mut f).await.unwrap();
        drop(f);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 44);
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 36);
        assert_eq!(u32::from_le_bytes(bytes[40..44].try_into().unwrap()), 0);
    }
}
