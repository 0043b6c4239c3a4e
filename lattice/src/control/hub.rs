//! Wires the whole control pipeline together.
//!
//! One hub owns the binding table, learn sessions, update scheduler,
//! parameter registry, band sampler, and the scene handle. MIDI events
//! arrive via [`ControlHub::event_sink`] (driven from the device callback
//! thread), the render loop drives [`ControlHub::on_frame`], and both
//! paths converge on the single normalization layer. All shared state
//! lives behind one lock, so every mutation of a binding's trigger or
//! targets is serialized.

use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use crate::control::audio_bands::{
    AudioBandConfig, AudioBandSampler, BandId,
};
use crate::control::bindings::{
    Binding, BindingError, BindingId, BindingRegistry, TriggerKey,
};
use crate::control::learn::{LearnSessions, LearnState};
use crate::control::params::{ParamError, ParameterRegistry};
use crate::control::scheduler::{COALESCE_INTERVAL, UpdateScheduler};
use crate::core::prelude::*;
use crate::io::audio::SpectrumSource;
use crate::io::midi::Event;
use crate::runtime::serialization::{self, Preset, PresetError};
use crate::scene::Scene;

struct HubState<S: Scene> {
    bindings: BindingRegistry,
    learn: LearnSessions,
    scheduler: UpdateScheduler,
    params: ParameterRegistry,
    bands: AudioBandSampler,
    scene: S,
}

pub struct ControlHub<S: Scene> {
    state: Arc<Mutex<HubState<S>>>,
}

impl<S: Scene> Clone for ControlHub<S> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<S: Scene> ControlHub<S> {
    pub fn new(params: ParameterRegistry, scene: S) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                bindings: BindingRegistry::new(),
                learn: LearnSessions::new(),
                scheduler: UpdateScheduler::default(),
                params,
                bands: AudioBandSampler::new(),
                scene,
            })),
        }
    }

    /// One decoded event: armed learn sessions evaluate first, then the
    /// normal dispatch path submits to the scheduler. A binding that just
    /// captured this very event does not also dispatch from it.
    pub fn on_event(&self, event: &Event) {
        let mut state = self.state.lock().unwrap();
        let state = &mut *state;

        let captures = state.learn.observe(&mut state.bindings, event);

        if let Some(dispatch) = state.bindings.resolve(event) {
            if captures.iter().any(|c| c.binding_id == dispatch.binding_id) {
                return;
            }
            for target in &dispatch.targets {
                state.scheduler.submit(target, dispatch.unit_value);
            }
        }
    }

    /// Per render frame: run the audio-band path, expire learn display
    /// states, and flush the scheduler if an interval has elapsed.
    pub fn on_frame(&self, now: Instant, source: &dyn SpectrumSource) {
        let mut state = self.state.lock().unwrap();
        let state = &mut *state;

        if let Some(frame) = source.spectrum() {
            state.bands.process_frame(
                &frame,
                &mut state.params,
                &mut state.scene,
            );
        }

        state.learn.tick(now);

        if state.scheduler.due(now) {
            state.scheduler.flush(&mut state.params, &mut state.scene);
        }
    }

    /// Flush pending updates immediately, ignoring the interval clock.
    pub fn flush_now(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        let state = &mut *state;
        state.scheduler.flush(&mut state.params, &mut state.scene)
    }

    pub fn notify_disconnected(&self) {
        self.state.lock().unwrap().scene.on_disconnected();
    }

    // --- bindings ---------------------------------------------------------

    pub fn add_binding(
        &self,
        trigger: TriggerKey,
        primary_target: Option<String>,
        secondary_targets: Vec<String>,
    ) -> Result<BindingId, Box<dyn Error>> {
        let mut state = self.state.lock().unwrap();
        Self::validate_targets(
            &state.params,
            &primary_target,
            &secondary_targets,
        )?;
        Ok(state
            .bindings
            .add(trigger, primary_target, secondary_targets)?)
    }

    pub fn set_binding_targets(
        &self,
        id: BindingId,
        primary_target: Option<String>,
        secondary_targets: Vec<String>,
    ) -> Result<(), Box<dyn Error>> {
        let mut state = self.state.lock().unwrap();
        Self::validate_targets(
            &state.params,
            &primary_target,
            &secondary_targets,
        )?;
        state
            .bindings
            .set_targets(id, primary_target, secondary_targets)?;
        Ok(())
    }

    /// Removal is immediately effective for future dispatch: the trigger
    /// index entry, any pending coalesced updates for the binding's
    /// targets, and any armed learn slot all go in one step.
    pub fn remove_binding(&self, id: BindingId) -> Option<Binding> {
        let mut state = self.state.lock().unwrap();
        let state = &mut *state;

        let binding = state.bindings.remove(id)?;
        state.scheduler.purge_all(binding.targets());
        state.learn.on_binding_removed(id);
        Some(binding)
    }

    pub fn binding(&self, id: BindingId) -> Option<Binding> {
        self.state.lock().unwrap().bindings.get(id).cloned()
    }

    pub fn binding_ids(&self) -> Vec<BindingId> {
        self.state.lock().unwrap().bindings.ids()
    }

    // --- learn ------------------------------------------------------------

    pub fn start_learn(&self, id: BindingId) -> Result<(), BindingError> {
        let mut state = self.state.lock().unwrap();
        let state = &mut *state;
        state.learn.start(&state.bindings, id)
    }

    pub fn cancel_learn(&self, id: BindingId) {
        self.state.lock().unwrap().learn.cancel(id);
    }

    pub fn learn_state(&self, id: BindingId) -> LearnState {
        self.state.lock().unwrap().learn.state(id)
    }

    // --- audio bands ------------------------------------------------------

    pub fn add_audio_band(
        &self,
        config: AudioBandConfig,
    ) -> Result<BandId, Box<dyn Error>> {
        let mut state = self.state.lock().unwrap();
        if let Some(target) = &config.target
            && !state.params.has(target)
        {
            return Err(Box::new(ParamError::UnknownParameter(
                target.clone(),
            )));
        }
        Ok(state.bands.add(config)?)
    }

    pub fn update_audio_band(
        &self,
        id: BandId,
        config: AudioBandConfig,
    ) -> Result<(), Box<dyn Error>> {
        let mut state = self.state.lock().unwrap();
        if let Some(target) = &config.target
            && !state.params.has(target)
        {
            return Err(Box::new(ParamError::UnknownParameter(
                target.clone(),
            )));
        }
        Ok(state.bands.update(id, config)?)
    }

    pub fn remove_audio_band(&self, id: BandId) -> Option<AudioBandConfig> {
        self.state.lock().unwrap().bands.remove(id)
    }

    pub fn audio_bands(&self) -> Vec<AudioBandConfig> {
        self.state.lock().unwrap().bands.configs()
    }

    // --- parameters -------------------------------------------------------

    pub fn param(&self, name: &str) -> Option<f32> {
        self.state.lock().unwrap().params.get(name)
    }

    pub fn param_bool(&self, name: &str) -> Option<bool> {
        self.state.lock().unwrap().params.bool_value(name)
    }

    pub fn with_scene<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.state.lock().unwrap().scene)
    }

    // --- presets ----------------------------------------------------------

    pub fn export_preset(&self) -> Preset {
        let state = self.state.lock().unwrap();
        serialization::export(&state.bindings, &state.bands.configs())
    }

    /// Atomic: either the whole document replaces the live binding table
    /// and band set, or nothing changes. Learn slots and pending updates
    /// are cleared on success since they referenced the old table.
    pub fn import_preset(
        &self,
        preset: &Preset,
        nyquist: Option<f32>,
    ) -> Result<(), PresetError> {
        let mut state = self.state.lock().unwrap();

        let (bindings, band_configs) =
            serialization::import(preset, &state.params, nyquist)?;

        state.bindings = bindings;
        state.bands.replace_all(band_configs);
        state.learn.clear();
        state.scheduler.clear();
        info!(
            "Imported preset: {} bindings, {} audio bands",
            state.bindings.len(),
            state.bands.len()
        );
        Ok(())
    }

    fn validate_targets(
        params: &ParameterRegistry,
        primary_target: &Option<String>,
        secondary_targets: &[String],
    ) -> Result<(), ParamError> {
        for target in primary_target.iter().chain(secondary_targets.iter()) {
            if !params.has(target) {
                return Err(ParamError::UnknownParameter(target.clone()));
            }
        }
        Ok(())
    }
}

impl<S: Scene + Send + 'static> ControlHub<S> {
    /// Event callback suitable for handing to
    /// [`DeviceSession`](crate::io::midi::DeviceSession); safe to invoke
    /// from the MIDI input thread.
    pub fn event_sink(&self) -> Arc<dyn Fn(Event) + Send + Sync> {
        let hub = self.clone();
        Arc::new(move |event| hub.on_event(&event))
    }

    /// Disconnect handler for
    /// [`DeviceSession::set_disconnect_handler`](crate::io::midi::DeviceSession::set_disconnect_handler);
    /// forwards a hot unplug to [`Scene::on_disconnected`].
    pub fn disconnect_sink(&self) -> Arc<dyn Fn() + Send + Sync> {
        let hub = self.clone();
        Arc::new(move || hub.notify_disconnected())
    }

    /// Background flush for hosts without a render loop of their own.
    /// The returned handle stops the thread on `stop()` or drop.
    pub fn spawn_ticker(&self) -> SchedulerTicker {
        let hub = self.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let handle = thread::spawn(move || {
            loop {
                thread::park_timeout(COALESCE_INTERVAL);
                if stop_flag.load(Ordering::Relaxed) {
                    break;
                }
                hub.flush_now();
            }
            debug!("Scheduler ticker stopped");
        });

        SchedulerTicker {
            stop,
            handle: Some(handle),
        }
    }
}

pub struct SchedulerTicker {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl SchedulerTicker {
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}

impl Drop for SchedulerTicker {
    fn drop(&mut self) {
        self.stop();
    }
}
