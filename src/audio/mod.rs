pub mod chime;

use chime::Chime;

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::{
    mpsc::{self, Sender},
    Arc, Mutex,
};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::error;
use rodio::{Decoder, OutputStream, Sink, Source};

/// What to play during a ringing session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoundSpec {
    /// The built-in chime.
    Chime,
    /// A sound file on disk.
    File(PathBuf),
}

impl SoundSpec {
    /// Resolves the configured sound path; empty selects the built-in chime.
    pub fn from_pref(sound_path: &str) -> Self {
        let trimmed = sound_path.trim();
        if trimmed.is_empty() {
            SoundSpec::Chime
        } else {
            SoundSpec::File(PathBuf::from(trimmed))
        }
    }
}

/// Natural length of a sound, where the media reports one. Unknown lengths
/// are treated as long by the playback heuristic.
pub fn probe_duration(spec: &SoundSpec) -> Option<Duration> {
    match spec {
        SoundSpec::Chime => Some(chime::CHIME_DURATION),
        SoundSpec::File(path) => {
            let file = File::open(path).ok()?;
            let decoder = Decoder::new(BufReader::new(file)).ok()?;
            decoder.total_duration()
        }
    }
}

enum SounderCommand {
    Play { spec: SoundSpec, looping: bool },
    Stop,
}

/// Plays the alarm sound. Rodio's output handles are not Send, so they live
/// on a dedicated thread driven over a channel.
#[derive(Clone)]
pub struct AlarmSounder {
    tx: Arc<Mutex<Option<Sender<SounderCommand>>>>,
}

impl AlarmSounder {
    pub fn new() -> Self {
        Self {
            tx: Arc::new(Mutex::new(None)),
        }
    }

    fn ensure_thread(&self) -> Result<Sender<SounderCommand>> {
        if let Some(tx) = self.tx.lock().unwrap().as_ref() {
            return Ok(tx.clone());
        }

        let (tx, rx) = mpsc::channel::<SounderCommand>();

        thread::Builder::new()
            .name("alarm-audio".to_string())
            .spawn(move || {
                let mut _stream: Option<OutputStream> = None;
                let mut sink: Option<Sink> = None;

                fn ensure_sink(
                    stream: &mut Option<OutputStream>,
                    sink: &mut Option<Sink>,
                ) -> Result<()> {
                    if sink.is_none() {
                        let (s, handle) = OutputStream::try_default()
                            .context("failed to open audio output")?;
                        let new_sink =
                            Sink::try_new(&handle).context("failed to create audio sink")?;
                        *stream = Some(s);
                        *sink = Some(new_sink);
                    }
                    Ok(())
                }

                while let Ok(cmd) = rx.recv() {
                    match cmd {
                        SounderCommand::Play { spec, looping } => {
                            if let Some(old) = sink.take() {
                                old.stop();
                            }
                            _stream = None;
                            if let Err(err) = ensure_sink(&mut _stream, &mut sink) {
                                error!("audio output unavailable: {err:#}");
                                continue;
                            }
                            if let Some(ref s) = sink {
                                if let Err(err) = append_source(s, &spec, looping) {
                                    error!("could not play {spec:?}: {err:#}");
                                }
                            }
                        }
                        SounderCommand::Stop => {
                            if let Some(old) = sink.take() {
                                old.stop();
                            }
                            _stream = None;
                        }
                    }
                }
            })
            .context("failed to spawn audio thread")?;

        let tx_clone = tx.clone();
        *self.tx.lock().unwrap() = Some(tx);
        Ok(tx_clone)
    }

    /// Starts playback, replacing whatever was playing. Decode failures are
    /// reported on the audio thread; the session keeps running silently.
    pub fn play(&self, spec: SoundSpec, looping: bool) -> Result<()> {
        let tx = self.ensure_thread()?;
        tx.send(SounderCommand::Play { spec, looping })
            .map_err(|err| anyhow!("audio thread is gone: {err}"))
    }

    pub fn stop(&self) -> Result<()> {
        if let Some(tx) = self.tx.lock().unwrap().as_ref() {
            let _ = tx.send(SounderCommand::Stop);
        }
        Ok(())
    }
}

fn append_source(sink: &Sink, spec: &SoundSpec, looping: bool) -> Result<()> {
    match spec {
        SoundSpec::Chime => {
            if looping {
                sink.append(Chime::new().repeat_infinite());
            } else {
                sink.append(Chime::new());
            }
        }
        SoundSpec::File(path) => {
            let file = File::open(path)
                .with_context(|| format!("failed to open sound file {}", path.display()))?;
            let decoder = Decoder::new(BufReader::new(file))
                .with_context(|| format!("failed to decode {}", path.display()))?;
            if looping {
                sink.append(decoder.repeat_infinite());
            } else {
                sink.append(decoder);
            }
        }
    }
    Ok(())
}
