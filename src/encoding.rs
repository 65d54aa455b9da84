use std::io::{ErrorKind, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, bail, Context, Result};

/// Streams straight-alpha RGBA frames to a system `ffmpeg` on a writer thread
/// so compositing never waits on the encoder.
pub struct FfmpegPipe {
    sender: Option<mpsc::SyncSender<Vec<u8>>>,
    worker: Option<JoinHandle<Result<()>>>,
    frame_size: usize,
}

impl FfmpegPipe {
    pub fn spawn(width: u32, height: u32, fps: u32, output_path: &Path) -> Result<Self> {
        let frame_size = usize::try_from(width)
            .ok()
            .and_then(|w| {
                usize::try_from(height)
                    .ok()
                    .map(|h| w.saturating_mul(h).saturating_mul(4))
            })
            .context("overlay frame size overflow")?;

        let path_str = output_path.to_string_lossy();
        if path_str.chars().any(|c| c.is_control()) {
            bail!("output path contains invalid control characters");
        }

        let mut child = build_command(width, height, fps, output_path)
            .spawn()
            .map_err(|error| {
                if error.kind() == ErrorKind::NotFound {
                    anyhow!(
                        "ffmpeg was not found on PATH. Install ffmpeg or render PNG frames with --frames-dir instead."
                    )
                } else {
                    anyhow!("failed to spawn ffmpeg process: {error}")
                }
            })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("failed to capture ffmpeg stdin"))?;

        let (sender, receiver) = mpsc::sync_channel::<Vec<u8>>(4);
        let worker = thread::Builder::new()
            .name("danmaku-ffmpeg-encoder".to_owned())
            .spawn(move || write_frames(child, stdin, receiver))
            .context("failed to spawn ffmpeg writer thread")?;

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
            frame_size,
        })
    }

    pub fn write_frame(&self, rgba_frame: Vec<u8>) -> Result<()> {
        if rgba_frame.len() != self.frame_size {
            bail!(
                "frame size mismatch: expected {} bytes, got {}",
                self.frame_size,
                rgba_frame.len()
            );
        }
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| anyhow!("encoder has already been finalized"))?;
        sender
            .send(rgba_frame)
            .map_err(|_| anyhow!("failed to enqueue frame for ffmpeg"))
    }

    pub fn finish(mut self) -> Result<()> {
        drop(self.sender.take());

        let handle = self
            .worker
            .take()
            .ok_or_else(|| anyhow!("ffmpeg worker thread missing"))?;
        match handle.join() {
            Ok(result) => result,
            Err(_) => Err(anyhow!("ffmpeg worker thread panicked")),
        }
    }
}

fn build_command(width: u32, height: u32, fps: u32, output_path: &Path) -> Command {
    let mut command = Command::new("ffmpeg");
    command
        .arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-y")
        .arg("-f")
        .arg("rawvideo")
        .arg("-pix_fmt")
        .arg("rgba")
        .arg("-s:v")
        .arg(format!("{}x{}", width, height))
        .arg("-r")
        .arg(fps.to_string())
        .arg("-i")
        .arg("-")
        .arg("-an");

    let extension = output_path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match extension.as_str() {
        // Keep the alpha channel so the overlay can be keyed over video later.
        "mov" => {
            command
                .arg("-c:v")
                .arg("prores_ks")
                .arg("-profile:v")
                .arg("4444")
                .arg("-pix_fmt")
                .arg("yuva444p10le");
        }
        "webm" => {
            command
                .arg("-c:v")
                .arg("libvpx-vp9")
                .arg("-pix_fmt")
                .arg("yuva420p");
        }
        _ => {
            command
                .arg("-c:v")
                .arg("libx264")
                .arg("-preset")
                .arg("medium")
                .arg("-crf")
                .arg("18")
                .arg("-pix_fmt")
                .arg("yuv420p")
                .arg("-movflags")
                .arg("+faststart");
        }
    }

    command
        .arg(output_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::inherit());
    command
}

fn write_frames(
    mut child: Child,
    mut stdin: ChildStdin,
    receiver: mpsc::Receiver<Vec<u8>>,
) -> Result<()> {
    for frame in receiver {
        if let Err(error) = stdin.write_all(&frame) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(anyhow!("failed to write frame to ffmpeg stdin: {error}"));
        }
    }
    stdin.flush().context("failed to flush ffmpeg stdin")?;
    drop(stdin);

    let status = child.wait().context("failed waiting for ffmpeg process")?;
    if !status.success() {
        bail!("ffmpeg failed with status {status}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::build_command;

    #[test]
    fn mov_output_keeps_alpha() {
        let command = build_command(320, 180, 30, Path::new("overlay.mov"));
        let args = command
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert!(args.windows(2).any(|pair| pair == ["-pix_fmt", "yuva444p10le"]));
        assert!(args.windows(2).any(|pair| pair == ["-s:v", "320x180"]));
        assert_eq!(args.last().map(String::as_str), Some("overlay.mov"));
    }

    #[test]
    fn mp4_output_uses_h264() {
        let command = build_command(320, 180, 30, Path::new("overlay.MP4"));
        let args = command
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert!(args.windows(2).any(|pair| pair == ["-c:v", "libx264"]));
    }
}
