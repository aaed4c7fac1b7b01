//! Runs a [`RouteMap`] on a dedicated worker thread.
//!
//! The worker owns the map. Everything readers may look at lives in a
//! `Mutex`-guarded [`SharedState`]: the weather and constraint snapshots, the
//! cancellation flag, the published isochrones and the final result. The
//! worker only takes the lock at step boundaries, so a step never observes a
//! snapshot swap and readers never observe a half-built isochrone.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use log::{error, info};

use crate::engine::constraints::ConstraintSet;
use crate::engine::models::{Degradation, Isochrone, Route, RouteStatus};
use crate::engine::routemap::{RouteMap, RouteOutcome, StepOutcome};
use crate::engine::weather::WeatherSnapshot;
use crate::error::RoutingError;

struct SharedState {
    weather: Arc<WeatherSnapshot>,
    constraints: Arc<ConstraintSet>,
    cancel: bool,
    published: Vec<Arc<Isochrone>>,
    status: RouteStatus,
    route: Option<Route>,
    degradation: Degradation,
}

/// Sent to the step callback after each published isochrone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    pub step: usize,
    pub elapsed_time: f64,
    pub positions: usize,
    pub closed: bool,
}

/// Cheap, clonable access to a running computation.
#[derive(Clone)]
pub struct RouteControl {
    shared: Arc<Mutex<SharedState>>,
}

impl RouteControl {
    fn lock(&self) -> MutexGuard<'_, SharedState> {
        // A panicking worker leaves consistent state behind: every write is a whole-value store.
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Requests cancellation. Checked at the start of the next step.
    pub fn cancel(&self) {
        self.lock().cancel = true;
    }

    /// Swaps the weather snapshot. The running step keeps the previous one.
    pub fn swap_weather(&self, weather: Arc<WeatherSnapshot>) {
        self.lock().weather = weather;
    }

    /// Swaps the constraint snapshot. The running step keeps the previous one.
    pub fn swap_constraints(&self, constraints: Arc<ConstraintSet>) {
        self.lock().constraints = constraints;
    }

    pub fn status(&self) -> RouteStatus {
        self.lock().status
    }

    pub fn latest_isochrone(&self) -> Option<Arc<Isochrone>> {
        self.lock().published.last().cloned()
    }

    /// Published isochrones in completion order.
    pub fn isochrones(&self) -> Vec<Arc<Isochrone>> {
        self.lock().published.clone()
    }

    pub fn route(&self) -> Option<Route> {
        self.lock().route.clone()
    }

    pub fn degradation(&self) -> Degradation {
        self.lock().degradation.clone()
    }
}

/// A route computation that has not been started yet.
pub struct RouteWorker {
    map: RouteMap,
    control: RouteControl,
}

impl RouteWorker {
    pub fn new(map: RouteMap) -> Self {
        let shared = SharedState {
            weather: Arc::clone(map.weather()),
            constraints: Arc::clone(map.constraints()),
            cancel: false,
            published: map.isochrones().to_vec(),
            status: map.status(),
            route: map.route().cloned(),
            degradation: map.degradation().clone(),
        };
        Self {
            map,
            control: RouteControl { shared: Arc::new(Mutex::new(shared)) },
        }
    }

    /// Handle usable before the worker starts, e.g. from inside a step callback.
    pub fn control(&self) -> RouteControl {
        self.control.clone()
    }

    pub fn spawn(self) -> io::Result<RouteHandle> {
        self.spawn_with(|_| {})
    }

    /// Starts the worker thread. `on_step` runs on the worker after each
    /// published isochrone, outside the lock.
    pub fn spawn_with<F>(self, mut on_step: F) -> io::Result<RouteHandle>
    where
        F: FnMut(&StepReport) + Send + 'static,
    {
        let RouteWorker { mut map, control } = self;
        let worker_control = control.clone();
        let thread = thread::Builder::new()
            .name("route-worker".into())
            .spawn(move || {
                loop {
                    adopt_shared_inputs(&mut map, &worker_control);
                    let outcome = map.step();
                    publish(&map, &worker_control);
                    if let StepOutcome::Finished(_) = outcome {
                        break;
                    }
                    if let Some(latest) = map.latest_isochrone() {
                        on_step(&StepReport {
                            step: latest.step,
                            elapsed_time: latest.elapsed_time,
                            positions: latest.len(),
                            closed: latest.closed,
                        });
                    }
                }
                map.outcome()
            })?;
        Ok(RouteHandle { control, thread })
    }
}

/// Step boundary: pick up swapped snapshots and the cancellation flag.
fn adopt_shared_inputs(map: &mut RouteMap, control: &RouteControl) {
    let state = control.lock();
    if state.cancel {
        map.cancel();
    }
    if !Arc::ptr_eq(&state.weather, map.weather()) {
        info!("Adopting new weather snapshot before step {}", map.isochrones().len() + 1);
        map.set_weather(Arc::clone(&state.weather));
    }
    if !Arc::ptr_eq(&state.constraints, map.constraints()) {
        info!("Adopting new constraint snapshot before step {}", map.isochrones().len() + 1);
        map.set_constraints(Arc::clone(&state.constraints));
    }
}

fn publish(map: &RouteMap, control: &RouteControl) {
    let mut state = control.lock();
    let published = map.isochrones();
    let seen = state.published.len();
    if published.len() > seen {
        state.published.extend(published[seen..].iter().cloned());
    }
    state.status = map.status();
    state.degradation = map.degradation().clone();
    if state.route.is_none() {
        state.route = map.route().cloned();
    }
}

/// A running computation.
pub struct RouteHandle {
    control: RouteControl,
    thread: JoinHandle<RouteOutcome>,
}

impl RouteHandle {
    pub fn control(&self) -> RouteControl {
        self.control.clone()
    }

    pub fn cancel(&self) {
        self.control.cancel();
    }

    pub fn swap_weather(&self, weather: Arc<WeatherSnapshot>) {
        self.control.swap_weather(weather);
    }

    pub fn swap_constraints(&self, constraints: Arc<ConstraintSet>) {
        self.control.swap_constraints(constraints);
    }

    pub fn status(&self) -> RouteStatus {
        self.control.status()
    }

    pub fn latest_isochrone(&self) -> Option<Arc<Isochrone>> {
        self.control.latest_isochrone()
    }

    pub fn isochrones(&self) -> Vec<Arc<Isochrone>> {
        self.control.isochrones()
    }

    pub fn route(&self) -> Option<Route> {
        self.control.route()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Waits for the worker and returns everything it computed.
    pub fn join(self) -> Result<RouteOutcome, RoutingError> {
        self.thread.join().map_err(|_| {
            error!("Route worker panicked");
            RoutingError::WorkerPanicked
        })
    }
}
