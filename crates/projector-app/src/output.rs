use anyhow::{Context, Result};
use projector_core::{FrameLayout, FrameSize};
use projector_renderer::{PipelineStats, Projector, ReloadOutcome, WindowSystem};
use tracing::info;

use crate::config_file::JsonConfigFile;

/// Host-side output adapter: the lifecycle a video host drives.
///
/// `start`, `stop` and `reload_config` block; call them from a blocking
/// context.
pub struct ProjectorOutput {
    projector: Projector,
    config_file: JsonConfigFile,
    output_size: FrameSize,
}

impl ProjectorOutput {
    /// `output_size` is what the host reports for its video output.
    pub fn new(windowing: Box<dyn WindowSystem>, config_file: JsonConfigFile, output_size: FrameSize) -> Self {
        Self { projector: Projector::builder(windowing).build(), config_file, output_size }
    }

    pub fn start(&self) -> Result<()> {
        let config = self.config_file.load(self.projector.default_bounds());
        self.projector.schedule_reload(config).context("Initial configuration rejected")?;
        self.projector
            .start(self.output_size)
            .with_context(|| format!("Failed to start projector at {}", self.output_size))?;
        Ok(())
    }

    /// One raw host frame. Non-blocking.
    pub fn raw_video(&self, data: &[u8], layout: FrameLayout) {
        self.projector.accept(data, layout.size.width, layout.size.height, layout.stride);
    }

    pub fn stop(&self) {
        self.projector.stop();
    }

    /// Re-reads the configuration file and applies it.
    pub fn reload_config(&self) -> Result<ReloadOutcome> {
        let config = self.config_file.load(self.projector.default_bounds());
        let outcome = self.projector.schedule_reload(config).context("Configuration reload failed")?;
        info!("Configuration {} applied: {:?}", self.config_file.path().display(), outcome);
        Ok(outcome)
    }

    pub fn config_file(&self) -> &JsonConfigFile {
        &self.config_file
    }

    pub fn is_running(&self) -> bool {
        self.projector.is_running()
    }

    pub fn stats(&self) -> PipelineStats {
        self.projector.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use projector_core::{Bounds, ProjectionConfig};
    use projector_renderer::SoftwareWindowSystem;

    const DESKTOP: Bounds = Bounds { x: 0, y: 0, width: 48, height: 27 };

    fn output(dir: &tempfile::TempDir) -> (ProjectorOutput, projector_renderer::ProbeHandle) {
        let windowing = SoftwareWindowSystem::new(DESKTOP);
        let probe = windowing.probe();
        let file = JsonConfigFile::new(dir.path().join("projection-config.json"));
        (ProjectorOutput::new(Box::new(windowing), file, FrameSize::new(16, 9)), probe)
    }

    #[test]
    fn start_generates_config_and_stop_tears_down() {
        let dir = tempfile::tempdir().unwrap();
        let (output, probe) = output(&dir);

        output.start().unwrap();
        assert!(output.is_running());
        assert!(output.config_file().path().exists());

        let layout = FrameLayout::packed(FrameSize::new(16, 9));
        output.raw_video(&vec![5; layout.byte_len()], layout);
        output.stop();

        assert!(!output.is_running());
        assert_eq!(output.stats().frames_accepted, 1);
        assert_eq!(probe.snapshot().sets_destroyed, 1);
    }

    #[test]
    fn edited_file_is_hot_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let (output, probe) = output(&dir);
        output.start().unwrap();

        let mut config = ProjectionConfig::default_for(DESKTOP);
        config.monitors[0].destination = Bounds::new(8, 0, 32, 18);
        output.config_file().write(&config).unwrap();

        assert_eq!(output.reload_config().unwrap(), ReloadOutcome::HotReloaded);
        assert_eq!(probe.snapshot().destinations, vec![Bounds::new(8, 0, 32, 18)]);
        assert_eq!(probe.snapshot().sets_created, 1);
        output.stop();
    }

    #[test]
    fn added_monitor_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let (output, probe) = output(&dir);
        output.start().unwrap();

        let mut config = ProjectionConfig::default_for(DESKTOP);
        let mut second = config.monitors[0].clone();
        second.monitor_index = 1;
        second.name = "Projector 1".into();
        second.window = Bounds::new(48, 0, 48, 27);
        config.monitors.push(second);
        output.config_file().write(&config).unwrap();

        assert_eq!(output.reload_config().unwrap(), ReloadOutcome::Restarted);
        assert_eq!(probe.snapshot().sets_created, 2);
        assert_eq!(probe.snapshot().destinations.len(), 2);
        output.stop();
    }
}
