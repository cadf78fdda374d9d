//! Host session - plays the host side of the protocol against an engine
//! wired to a [`MockController`].

use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail, ensure};
use tracing::{debug, info};

use crate::backend::Services;
use crate::config::EngineConfig;
use crate::engine::FastbootEngine;
use crate::events::{FastbootObserver, TracingObserver};
use crate::protocol::Response;
use crate::transport::{MockController, TransferStatus};

/// Host-side driver for a simulated fastboot function.
pub struct HostSession<O: FastbootObserver = TracingObserver> {
    engine: FastbootEngine<MockController, O>,
    usb: MockController,
    /// Largest transfer the host sends at once.
    chunk: usize,
}

impl HostSession<TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(config: EngineConfig, services: Services) -> Result<Self> {
        Self::with_observer(config, services, Arc::new(TracingObserver))
    }
}

impl<O: FastbootObserver> HostSession<O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(config: EngineConfig, services: Services, observer: Arc<O>) -> Result<Self> {
        let usb = MockController::new();
        let chunk = config.ep_buffer_size;
        let mut engine = FastbootEngine::bind_with_observer(config, usb.clone(), services, observer)?;
        engine.enable()?;
        Ok(Self { engine, usb, chunk })
    }

    /// Send data in pieces of at most `chunk` bytes.
    pub fn with_chunk(mut self, chunk: usize) -> Self {
        self.chunk = chunk.max(1);
        self
    }

    pub fn engine(&self) -> &FastbootEngine<MockController, O> {
        &self.engine
    }

    pub fn controller(&self) -> &MockController {
        &self.usb
    }

    /// Complete the armed OUT request with `bytes`, without draining IN.
    pub fn deliver(&mut self, bytes: &[u8]) -> Result<()> {
        ensure!(!self.engine.is_halted(), "device has left fastboot");
        let armed = self
            .usb
            .take_out_request()
            .ok_or_else(|| anyhow!("no OUT request armed"))?;
        ensure!(
            bytes.len() <= armed,
            "transfer of {} bytes exceeds armed request of {}",
            bytes.len(),
            armed
        );
        self.engine.on_out_complete(TransferStatus::Completed, bytes);
        Ok(())
    }

    /// Complete IN requests until none is queued. Returns the frames seen.
    pub fn pump(&mut self) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        while let Some(frame) = self.usb.complete_in() {
            self.engine
                .on_in_complete(TransferStatus::Completed, frame.len());
            frames.push(frame);
            if self.engine.is_halted() {
                break;
            }
        }
        frames
    }

    /// Send one command and collect everything the device answers.
    pub fn send(&mut self, command: &str) -> Result<Vec<Vec<u8>>> {
        debug!(command = %command, "Host sending command");
        self.deliver(command.as_bytes())?;
        Ok(self.pump())
    }

    /// Send a command that is answered by exactly one status frame.
    pub fn command(&mut self, command: &str) -> Result<Response> {
        let frames = self.send(command)?;
        let [frame] = frames.as_slice() else {
            bail!("expected one response to {command:?}, got {}", frames.len());
        };
        let response = Response::parse(frame)
            .with_context(|| format!("malformed response to {command:?}"))?;
        info!(command = %command, response = %response, "Command answered");
        Ok(response)
    }

    /// `download:` followed by the data phase.
    ///
    /// Returns the device's final answer: `OKAY`, or the `FAIL` that
    /// refused the download.
    pub fn download(&mut self, data: &[u8]) -> Result<Response> {
        let size = u32::try_from(data.len()).context("download larger than 4 GiB")?;
        match self.command(&format!("download:{size:08x}"))? {
            Response::Data(announced) if announced == size => {}
            Response::Data(announced) => {
                bail!("device announced {announced:#x} bytes, expected {size:#x}")
            }
            other => return Ok(other),
        }

        let mut offset = 0;
        while offset < data.len() {
            let armed = self
                .usb
                .out_armed()
                .ok_or_else(|| anyhow!("device stopped receiving at {offset:#x}"))?;
            let end = data.len().min(offset + armed.min(self.chunk));
            self.deliver(&data[offset..end])?;
            offset = end;
            ensure!(
                offset == data.len() || self.usb.in_pending().is_none(),
                "device answered mid-download at {offset:#x}"
            );
        }

        let frames = self.pump();
        let [frame] = frames.as_slice() else {
            bail!("expected one response after download, got {}", frames.len());
        };
        Response::parse(frame).context("malformed response after download")
    }

    /// `upload`, collecting the data phase.
    pub fn upload(&mut self) -> Result<Vec<u8>> {
        let frames = self.send("upload")?;
        let (first, rest) = frames
            .split_first()
            .ok_or_else(|| anyhow!("no response to upload"))?;
        let size = match Response::parse(first) {
            Some(Response::Data(size)) => size as usize,
            Some(other) => bail!("upload refused: {other}"),
            None => bail!("malformed upload header"),
        };

        let (last, chunks) = rest
            .split_last()
            .ok_or_else(|| anyhow!("upload ended without status"))?;
        match Response::parse(last) {
            Some(Response::Okay(_)) => {}
            Some(other) => bail!("upload failed: {other}"),
            None => bail!("malformed upload status"),
        }

        let data = chunks.concat();
        ensure!(
            data.len() == size,
            "upload returned {} bytes, announced {}",
            data.len(),
            size
        );
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        FlashLockState, MemoryEnv, MemoryFlash, MemoryLock, PlatformAction, RecordingPlatform,
        VbootLockState,
    };
    use crate::events::NullObserver;

    fn session(capacity: usize) -> HostSession<NullObserver> {
        let config = EngineConfig {
            staging_capacity: capacity,
            ..Default::default()
        };
        HostSession::with_observer(
            config,
            Services::new(RecordingPlatform::new()),
            Arc::new(NullObserver),
        )
        .unwrap()
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + i / 251) as u8).collect()
    }

    #[test]
    fn test_scenario() {
        let mut host = session(0x10000);
        assert_eq!(host.command("getvar:version").unwrap(), Response::okay_with("0.4"));
        assert_eq!(host.download(&[0x42; 16]).unwrap(), Response::okay());
        assert_eq!(
            host.command("getvar:not-a-real-var").unwrap(),
            Response::fail("Variable not implemented")
        );
        assert_eq!(
            host.command("frobnicate").unwrap(),
            Response::fail("unknown command")
        );
    }

    #[test]
    fn test_round_trip_across_chunk_sizes() {
        let data = pattern(10_000);
        for chunk in [1, 63, 64, 511, 512, 4096, 9_999, 10_000] {
            let mut host = session(0x10000).with_chunk(chunk);
            assert_eq!(host.download(&data).unwrap(), Response::okay(), "chunk {chunk}");
            assert_eq!(host.upload().unwrap(), data, "chunk {chunk}");
        }
    }

    #[test]
    fn test_round_trip_at_capacity() {
        let data = pattern(0x2000);
        let mut host = session(0x2000);
        assert_eq!(host.download(&data).unwrap(), Response::okay());
        assert_eq!(host.upload().unwrap(), data);
    }

    #[test]
    fn test_upload_twice_needs_new_source() {
        let mut host = session(0x1000);
        host.download(b"payload").unwrap();
        assert_eq!(host.upload().unwrap(), b"payload");
        assert!(host.upload().is_err());
    }

    #[test]
    fn test_two_sends_yield_one_frame() {
        let mut host = session(0x1000);
        host.deliver(b"getvar:version").unwrap();
        host.deliver(b"getvar:product").unwrap();
        assert_eq!(host.controller().cancelled(), 1);

        let frames = host.pump();
        assert_eq!(frames.len(), 1);
        assert_eq!(Response::parse(&frames[0]), Some(Response::okay_with("evb")));
        assert!(host.controller().in_pending().is_none());
    }

    #[test]
    fn test_too_large_then_valid() {
        let mut host = session(0x1000);
        assert_eq!(
            host.command("download:00001001").unwrap(),
            Response::fail("data too large")
        );
        assert_eq!(host.engine().state().download_size, 0);
        assert_eq!(
            host.command("download:00000000").unwrap(),
            Response::fail("data invalid size")
        );
        assert_eq!(host.download(&[1; 0x1000]).unwrap(), Response::okay());
    }

    #[test]
    fn test_max_download_size() {
        let mut host = session(0x0800_0000);
        assert_eq!(
            host.command("getvar:max-download-size").unwrap(),
            Response::okay_with("0x08000000")
        );
    }

    #[test]
    fn test_every_command_gets_one_answer() {
        let mut host = session(0x1000);
        for command in [
            "getvar:",
            "getvar:product",
            "set_active:a",
            "flashing lock",
            "flash:boot",
            "erase:boot",
            "oem format",
            "oem nothing",
            "upload",
            "xyzzy",
        ] {
            let response = host.command(command).unwrap();
            assert!(response.is_okay() || response.is_fail(), "{command}: {response}");
        }
    }

    #[test]
    fn test_flash_after_download() {
        let flash = MemoryFlash::new().with_partition("boot", 0x1000, "raw");
        let lock = MemoryLock::new(FlashLockState::Unlocked, VbootLockState::Unlocked);
        let services = Services::new(RecordingPlatform::new())
            .with_env(MemoryEnv::new())
            .with_partitions(flash.clone())
            .with_flash(flash.clone())
            .with_lock(lock.clone());
        let config = EngineConfig {
            staging_capacity: 0x1000,
            ..Default::default()
        };
        let mut host = HostSession::with_observer(config, services, Arc::new(NullObserver)).unwrap();

        let image = pattern(0x800);
        host.download(&image).unwrap();
        assert_eq!(host.command("flash:boot").unwrap(), Response::okay());
        assert_eq!(flash.image("boot"), Some(image));

        host.command("flashing lock").unwrap();
        assert_eq!(
            host.command("flash:boot").unwrap(),
            Response::fail("The device is locked, can not flash!")
        );
    }

    #[test]
    fn test_reboot_bootloader_ends_session() {
        let platform = RecordingPlatform::new();
        let config = EngineConfig {
            staging_capacity: 0x1000,
            ..Default::default()
        };
        let mut host = HostSession::with_observer(
            config,
            Services::new(platform.clone()),
            Arc::new(NullObserver),
        )
        .unwrap();

        assert_eq!(host.command("reboot-bootloader").unwrap(), Response::okay());
        assert_eq!(
            platform.actions(),
            vec![PlatformAction::SetRebootFlag, PlatformAction::Reset]
        );
        assert!(host.command("getvar:version").is_err());
    }
}
