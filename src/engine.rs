//! The control-thread lifecycle and queueing layer.
//!
//! `AudioEngine` creates and destroys sounds, keeps the active set and the
//! serialized FIFO of speech/earcons, and runs the per-update geometry pass
//! that recomputes every source's bearing and proximity. Beacons play
//! concurrently; queued sounds play one at a time, each promoted when its
//! predecessor finishes. All set/queue state lives in one `EngineInner`
//! behind a plain (non-reentrant) mutex; removal is done by collecting
//! finished ids and compacting, never from inside iteration. The render
//! thread never takes this lock.

use std::collections::VecDeque;
use std::io::Read;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::audio_data::AssetLoader;
use crate::catalog::{BEACON_DESCRIPTORS, BeaconDescriptor, descriptor_index_by_name};
use crate::error::Result;
use crate::geo::{bearing_from_two_points, destination_coordinate, distance_meters, normalize_degrees};
use crate::mixer::AudioMixer;
use crate::source::{
    AudioCategory, AudioMode, AudioSource, AudioType, BEHIND_DEGREES, BeaconSource, EarconSource,
    PositioningMode, SampleFormat, SoundId, SoundIdAllocator, SourceMode, SourceState,
    SpeechSource,
};

/// Headings above this are treated as unknown (the host's sentinel for "no
/// compass fix").
const HEADING_UNKNOWN_THRESHOLD: f64 = 10_000.0;

/// How far out a compass beacon's anchor point is synthesized; far enough
/// that listener movement never meaningfully changes its bearing.
const COMPASS_ANCHOR_DISTANCE_METERS: f64 = 100_000.0;

/// Host notification surface. A single best-effort event; the engine works
/// silently when no sink is attached.
pub trait EventSink: Send + Sync {
    /// Every active and queued sound is gone.
    fn all_sounds_cleared(&self);
}

struct ActiveSound {
    id: SoundId,
    state: Arc<SourceState>,
    category: AudioCategory,
    positioning: PositioningMode,
}

struct QueuedSound {
    id: SoundId,
    state: Arc<SourceState>,
    category: AudioCategory,
    positioning: PositioningMode,
    utterance: Option<String>,
    /// `None` once the sound has been handed to the mixer (it is the
    /// currently playing head).
    source: Option<Box<dyn AudioSource>>,
}

struct EngineInner {
    active: Vec<ActiveSound>,
    queue: VecDeque<QueuedSound>,
    serialized_playing: bool,
    beacon_type: usize,
    muted: bool,
    listener: (f64, f64, f64),
}

/// The control-thread API of the audio core.
pub struct AudioEngine {
    mixer: AudioMixer,
    loader: Arc<dyn AssetLoader>,
    inner: Mutex<EngineInner>,
    ids: SoundIdAllocator,
    event_sink: Mutex<Option<Arc<dyn EventSink>>>,
}

impl AudioEngine {
    /// Does not open the audio device; call [`start`](Self::start).
    pub fn new(loader: Arc<dyn AssetLoader>) -> Self {
        Self {
            mixer: AudioMixer::new(),
            loader,
            inner: Mutex::new(EngineInner {
                active: Vec::new(),
                queue: VecDeque::new(),
                serialized_playing: false,
                beacon_type: 1, // "Current"
                muted: false,
                listener: (0.0, 0.0, f64::NAN),
            }),
            ids: SoundIdAllocator::new(),
            event_sink: Mutex::new(None),
        }
    }

    pub fn start(&mut self) -> Result<()> {
        self.mixer.start()
    }

    pub fn stop(&mut self) {
        self.mixer.stop();
    }

    pub fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        *self.lock_sink() = Some(sink);
    }

    pub fn clear_event_sink(&self) {
        *self.lock_sink() = None;
    }

    /// Select the beacon style for subsequently created beacons. Out-of-range
    /// indices are rejected without effect.
    pub fn set_beacon_type(&self, index: usize) -> bool {
        if index >= BEACON_DESCRIPTORS.len() {
            log::warn!("invalid beacon type index {index}");
            return false;
        }
        self.lock_inner().beacon_type = index;
        true
    }

    pub fn set_beacon_type_by_name(&self, name: &str) -> bool {
        match descriptor_index_by_name(name) {
            Some(index) => self.set_beacon_type(index),
            None => {
                log::warn!("unknown beacon type {name:?}");
                false
            }
        }
    }

    pub fn beacon_descriptor(&self) -> &'static BeaconDescriptor {
        &BEACON_DESCRIPTORS[self.lock_inner().beacon_type]
    }

    /// Create a beacon; it starts playing immediately, concurrently with
    /// everything else. A `HeadingAndProximity` positioning gets the
    /// reserved near/far style instead of the selected directional one.
    pub fn create_beacon(&self, positioning: PositioningMode) -> SoundId {
        let rate = self.mixer.sample_rate();
        let mut inner = self.lock_inner();

        let mut positioning = positioning;
        if positioning.audio_type == AudioType::Compass {
            // Anchor the fixed bearing as a far-away point so the geometry
            // pass can treat it like any located sound.
            let (lat, lon) = destination_coordinate(
                inner.listener.0,
                inner.listener.1,
                positioning.heading,
                COMPASS_ANCHOR_DISTANCE_METERS,
            );
            positioning.latitude = lat;
            positioning.longitude = lon;
        }

        let source = if positioning.audio_mode == AudioMode::HeadingAndProximity {
            BeaconSource::new_proximity(self.loader.as_ref(), rate, positioning)
        } else {
            BeaconSource::new(
                &BEACON_DESCRIPTORS[inner.beacon_type],
                self.loader.as_ref(),
                rate,
                positioning,
            )
        };

        let id = self.ids.next();
        let state = source.state().clone();
        state.set_muted(inner.muted);

        self.mixer.add_source(id, Box::new(source));
        inner.active.push(ActiveSound {
            id,
            state,
            category: AudioCategory::Beacon,
            positioning,
        });
        log::info!("created beacon {id}");
        id
    }

    /// Create a speech sound fed by `reader` (an owned duplicate of the
    /// host's descriptor). Queued; it cannot start until
    /// [`update_audio_config`](Self::update_audio_config) confirms the
    /// stream format for its utterance.
    pub fn create_speech(
        &self,
        reader: Box<dyn Read + Send>,
        positioning: PositioningMode,
        utterance_id: &str,
        declared_rate: u32,
        declared_format: SampleFormat,
        declared_channels: u32,
    ) -> SoundId {
        let source = SpeechSource::new(
            reader,
            positioning,
            self.mixer.sample_rate(),
            declared_rate,
            declared_format,
            declared_channels,
        );
        let id = self.add_queued(Box::new(source), positioning, Some(utterance_id.to_string()));
        log::info!("created speech {id} (utterance {utterance_id:?})");
        id
    }

    /// Create a one-shot earcon from a catalog asset. Queued behind any
    /// pending speech.
    pub fn create_earcon(&self, asset: &str, positioning: PositioningMode) -> SoundId {
        let clip = self
            .loader
            .load_or_silent(asset, self.mixer.sample_rate());
        let source = EarconSource::new(clip, self.mixer.sample_rate(), positioning);
        let id = self.add_queued(Box::new(source), positioning, None);
        log::info!("created earcon {id} ({asset})");
        id
    }

    /// Late-bound speech format: the speech engine reports the real stream
    /// parameters once synthesis begins, unblocking the matching queued
    /// sound.
    pub fn update_audio_config(
        &self,
        utterance_id: &str,
        sample_rate: u32,
        format: SampleFormat,
        channels: u32,
    ) {
        let inner = self.lock_inner();
        for entry in inner.queue.iter() {
            if entry.utterance.as_deref() == Some(utterance_id) {
                entry.state.set_speech_format(sample_rate, format, channels);
            }
        }
    }

    /// Begin a beacon's outro; it finishes and is retired once the outro
    /// clip has played.
    pub fn request_outro(&self, id: SoundId) {
        let inner = self.lock_inner();
        if let Some(entry) = inner.active.iter().find(|e| e.id == id) {
            entry.state.request_outro();
        }
    }

    /// The periodic control-thread tick: derive category volumes from
    /// focus/heading state, retire finished sources, promote the queue, and
    /// recompute every survivor's geometry.
    pub fn update_geometry(
        &mut self,
        latitude: f64,
        longitude: f64,
        heading: f64,
        focus_gained: bool,
        ducking_allowed: bool,
        proximity_near: f64,
    ) {
        self.mixer.handle_device_events();

        let heading = if heading > HEADING_UNKNOWN_THRESHOLD {
            f64::NAN
        } else {
            heading
        };

        if focus_gained {
            self.mixer.set_speech_volume(1.0);
            self.mixer
                .set_beacon_volume(if heading.is_nan() { 0.2 } else { 1.0 });
        } else if ducking_allowed {
            self.mixer.set_beacon_volume(0.1);
            self.mixer.set_speech_volume(0.2);
        } else {
            self.mixer.set_beacon_volume(0.0);
            self.mixer.set_speech_volume(0.0);
        }

        let mut inner = self.lock_inner();
        inner.listener = (latitude, longitude, heading);
        let was_empty = inner.active.is_empty();

        // Retire finished sources; mark-and-compact, no removal from inside
        // iteration.
        let mut finished = Vec::new();
        inner.active.retain(|entry| {
            if entry.state.is_finished() {
                finished.push(entry.id);
                false
            } else {
                true
            }
        });
        let mut start_next = false;
        for id in finished {
            self.mixer.remove_source(id);
            if inner.queue.front().map(|q| q.id) == Some(id) {
                inner.queue.pop_front();
                inner.serialized_playing = false;
                start_next = true;
            }
            log::debug!("retired sound {id}");
        }

        for entry in inner.active.iter() {
            update_source_geometry(entry, latitude, longitude, heading, proximity_near);
        }

        // Promote the queue head when nothing serialized is playing.
        if start_next || !inner.serialized_playing {
            let promoted = inner.queue.front_mut().and_then(|head| {
                if head.state.can_start() {
                    head.source.take().map(|boxed| {
                        (boxed, head.id, head.state.clone(), head.category, head.positioning)
                    })
                } else {
                    None
                }
            });
            if let Some((boxed, id, state, category, positioning)) = promoted {
                self.mixer.add_source(id, boxed);
                inner.active.push(ActiveSound {
                    id,
                    state,
                    category,
                    positioning,
                });
                inner.serialized_playing = true;
                log::debug!("promoted queued sound {id}");
            }
        }

        let all_clear = inner.active.is_empty() && !was_empty && inner.queue.is_empty();
        drop(inner);
        if all_clear {
            self.notify_cleared();
        }
    }

    /// Destroy a sound wherever it lives. Returns whether anything was
    /// removed.
    pub fn destroy_sound(&self, id: SoundId) -> bool {
        let mut inner = self.lock_inner();
        let mut removed = false;

        if let Some(pos) = inner.active.iter().position(|e| e.id == id) {
            inner.active.remove(pos);
            self.mixer.remove_source(id);
            removed = true;
        }
        if let Some(pos) = inner.queue.iter().position(|q| q.id == id) {
            let was_playing_head = pos == 0 && inner.queue[pos].source.is_none();
            inner.queue.remove(pos);
            if was_playing_head {
                inner.serialized_playing = false;
            }
            removed = true;
        }

        let all_clear = removed && inner.active.is_empty() && inner.queue.is_empty();
        drop(inner);
        if all_clear {
            self.notify_cleared();
        }
        if removed {
            log::info!("destroyed sound {id}");
        }
        removed
    }

    /// Drop every pending queued sound. A currently playing serialized
    /// sound keeps playing to completion; the serialized slot is freed for
    /// whatever is queued next.
    pub fn clear_queue(&self) {
        let mut inner = self.lock_inner();
        let dropped = inner.queue.len();
        inner.queue.clear();
        inner.serialized_playing = false;
        log::info!("cleared queue ({dropped} entries)");
    }

    /// Flip the persistent beacon mute and apply it to every active beacon.
    pub fn toggle_mute(&self) -> bool {
        let mut inner = self.lock_inner();
        inner.muted = !inner.muted;
        let muted = inner.muted;
        for entry in inner
            .active
            .iter()
            .filter(|e| e.category == AudioCategory::Beacon)
        {
            entry.state.set_muted(muted);
        }
        muted
    }

    pub fn queue_depth(&self) -> usize {
        self.lock_inner().queue.len()
    }

    pub fn mixer(&self) -> &AudioMixer {
        &self.mixer
    }

    fn add_queued(
        &self,
        source: Box<dyn AudioSource>,
        positioning: PositioningMode,
        utterance: Option<String>,
    ) -> SoundId {
        let id = self.ids.next();
        let state = source.state().clone();
        let category = source.category();
        let mut entry = QueuedSound {
            id,
            state,
            category,
            positioning,
            utterance,
            source: Some(source),
        };

        let mut inner = self.lock_inner();
        if inner.queue.is_empty() && entry.state.can_start() {
            if let Some(boxed) = entry.source.take() {
                self.mixer.add_source(id, boxed);
                inner.active.push(ActiveSound {
                    id,
                    state: entry.state.clone(),
                    category,
                    positioning,
                });
                inner.serialized_playing = true;
            }
        }
        inner.queue.push_back(entry);
        id
    }

    fn notify_cleared(&self) {
        let sink = self.lock_sink().clone();
        if let Some(sink) = sink {
            sink.all_sounds_cleared();
        }
        log::debug!("all sounds cleared");
    }

    fn lock_inner(&self) -> MutexGuard<'_, EngineInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_sink(&self) -> MutexGuard<'_, Option<Arc<dyn EventSink>>> {
        match self.event_sink.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.clear_queue();
        let ids: Vec<SoundId> = self.lock_inner().active.iter().map(|e| e.id).collect();
        for id in ids {
            self.destroy_sound(id);
        }
        self.mixer.stop();
    }
}

/// Recompute one source's published direction and proximity bucket.
fn update_source_geometry(
    entry: &ActiveSound,
    latitude: f64,
    longitude: f64,
    heading: f64,
    proximity_near: f64,
) {
    let positioning = &entry.positioning;
    match positioning.audio_type {
        AudioType::Standard => {}
        AudioType::Relative => {
            // Fixed offset from wherever the listener faces.
            let off_axis = normalize_degrees(positioning.heading);
            entry.state.set_off_axis_degrees(off_axis);
            entry
                .state
                .set_direction(off_axis.to_radians() as f32, 0.0);
        }
        AudioType::Localized | AudioType::Compass => {
            let off_axis = if heading.is_nan() {
                // Unknown heading: sound quiet and behind rather than
                // confidently wrong.
                BEHIND_DEGREES
            } else {
                let bearing = bearing_from_two_points(
                    latitude,
                    longitude,
                    positioning.latitude,
                    positioning.longitude,
                );
                normalize_degrees(bearing - heading)
            };
            entry.state.set_off_axis_degrees(off_axis);
            entry
                .state
                .set_direction(off_axis.to_radians() as f32, 0.0);

            if positioning.audio_mode == AudioMode::HeadingAndProximity {
                let distance = distance_meters(
                    latitude,
                    longitude,
                    positioning.latitude,
                    positioning.longitude,
                );
                let mode = if distance < proximity_near {
                    SourceMode::Near
                } else if distance < 2.0 * proximity_near {
                    SourceMode::Far
                } else {
                    SourceMode::TooFar
                };
                entry.state.set_mode(mode);
            }
        }
    }
}
