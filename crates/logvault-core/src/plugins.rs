use crate::error::Error;
use crate::format::msglog::{MSGLOG_EXTENSION, MSGLOG_TYPE};
use crate::format::{FormatReader, MsglogReader};
use crate::jobs::builtin::{FilesetInfoJob, TopicStatsJob};
use crate::jobs::Job;
use crate::registry::{Registry, RegistryKey};
use crate::scanner::{Detector, IndexedDetector};

/// The detectors, format readers and jobs known to this process.
///
/// Built once at start-up from an explicit list; format readers are keyed by
/// fileset type, detectors and jobs by their dotted key.
#[derive(Default)]
pub struct Plugins {
    pub detectors: Registry<Box<dyn Detector>>,
    pub formats: Registry<Box<dyn FormatReader>>,
    pub jobs: Registry<Box<dyn Job>>,
}

impl Plugins {
    pub fn new() -> Self {
        Self::default()
    }

    /// The `msglog` format with its detector, plus the core jobs.
    pub fn builtin() -> Result<Self, Error> {
        let mut plugins = Self::new();
        let detector = IndexedDetector::new(MSGLOG_TYPE, MSGLOG_EXTENSION)
            .map_err(|e| Error::Other(e.to_string()))?;
        plugins.add_detector(RegistryKey::new("", MSGLOG_TYPE), Box::new(detector))?;
        plugins.add_format(MSGLOG_TYPE, Box::new(MsglogReader))?;
        plugins.add_job(Box::new(TopicStatsJob::new()?))?;
        plugins.add_job(Box::new(FilesetInfoJob::new()?))?;
        Ok(plugins)
    }

    pub fn add_detector(
        &mut self,
        key: RegistryKey,
        detector: Box<dyn Detector>,
    ) -> Result<(), Error> {
        self.detectors.insert(key, detector)?;
        Ok(())
    }

    pub fn add_format(
        &mut self,
        fileset_type: &str,
        reader: Box<dyn FormatReader>,
    ) -> Result<(), Error> {
        self.formats.insert(RegistryKey::new("", fileset_type), reader)?;
        Ok(())
    }

    pub fn add_job(&mut self, job: Box<dyn Job>) -> Result<(), Error> {
        let key = job.descriptor().key.clone();
        self.jobs.insert(key, job)?;
        Ok(())
    }

    pub fn detector_refs(&self) -> Vec<&dyn Detector> {
        self.detectors.values().map(|d| d.as_ref()).collect()
    }

    pub fn format(&self, fileset_type: &str) -> Option<&dyn FormatReader> {
        self.formats.get(fileset_type).map(|r| r.as_ref())
    }

    pub fn job(&self, key: &str) -> Result<&dyn Job, Error> {
        self.jobs
            .get(key)
            .map(|j| j.as_ref())
            .ok_or_else(|| Error::UnknownJob(key.to_string()))
    }
}
