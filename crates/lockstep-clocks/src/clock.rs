//! The clock tree: system, correlated, range-correlated, offset and tunable
//! clocks.

use std::sync::{Arc, Mutex, Weak};

use crate::correlation::Correlation;
use crate::error::{ClockError, ClockResult};
use crate::source::MonotonicTimeSource;
use crate::DEFAULT_MAX_FREQ_ERROR_PPM;

/// Number of tick-read pairs sampled when estimating the precision of a
/// system clock at construction.
const PRECISION_SAMPLES: usize = 1000;

/// Observer of clock changes.
///
/// Observers are notified synchronously from the thread that mutated the
/// clock, with the originating clock as the cause. An observer must not take
/// a lock that could invert against the clock's own lock, and must not
/// mutate the notifying clock from inside the callback.
pub trait ClockObserver: Send + Sync {
    fn clock_changed(&self, cause: &Arc<Clock>);
}

/// The kind of a clock node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockKind {
    System,
    Correlated,
    RangeCorrelated,
    Offset,
    Tunable,
}

struct SystemState {
    source: Arc<dyn MonotonicTimeSource>,
    tick_rate: f64,
    precision_secs: f64,
    max_freq_error_ppm: f64,
}

struct CorrelatedState {
    parent: Arc<Clock>,
    tick_rate: f64,
    speed: f64,
    correlation: Correlation,
    /// Tunable clocks re-base their correlation before a speed or tick rate
    /// change so the change does not produce a discontinuity.
    tunable: bool,
}

struct RangeCorrelatedState {
    parent: Arc<Clock>,
    /// Advisory only; the real rate is implied by the two correlations.
    tick_rate: f64,
    correlation1: Correlation,
    correlation2: Correlation,
}

struct OffsetState {
    parent: Arc<Clock>,
    offset_secs: f64,
}

enum Kind {
    System(SystemState),
    Correlated(CorrelatedState),
    RangeCorrelated(RangeCorrelatedState),
    Offset(OffsetState),
}

/// A node in a clock tree.
///
/// Clocks are shared handles (`Arc<Clock>`); dependent clocks keep a strong
/// reference to their parent and register themselves as observers of it, so
/// a change anywhere in the ancestry propagates to every descendant.
///
/// Tick values are `f64`. Conversions that are undefined (zero-speed clock
/// queried away from its correlation point) return `f64::NAN`.
pub struct Clock {
    kind: Mutex<Kind>,
    available: Mutex<bool>,
    dependents: Mutex<Vec<Weak<dyn ClockObserver>>>,
}

fn check_tick_rate(tick_rate: f64) -> ClockResult<()> {
    if tick_rate > 0.0 && tick_rate.is_finite() {
        Ok(())
    } else {
        Err(ClockError::InvalidTickRate(tick_rate))
    }
}

impl Clock {
    // ------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------

    /// Root clock reading the supplied monotonic time source, with the
    /// default assumed maximum frequency error of 500 ppm.
    ///
    /// Tick values are whole numbers of ticks. Precision is estimated at
    /// construction by sampling the smallest observable positive difference
    /// between consecutive readings.
    pub fn system(
        source: Arc<dyn MonotonicTimeSource>,
        tick_rate: f64,
    ) -> ClockResult<Arc<Self>> {
        Self::system_with_max_freq_error(source, tick_rate, DEFAULT_MAX_FREQ_ERROR_PPM)
    }

    /// Root clock with an explicit maximum frequency error, in ppm.
    pub fn system_with_max_freq_error(
        source: Arc<dyn MonotonicTimeSource>,
        tick_rate: f64,
        max_freq_error_ppm: f64,
    ) -> ClockResult<Arc<Self>> {
        check_tick_rate(tick_rate)?;
        let precision_secs = measure_source_precision(source.as_ref(), tick_rate);
        Ok(Arc::new(Clock {
            kind: Mutex::new(Kind::System(SystemState {
                source,
                tick_rate,
                precision_secs,
                max_freq_error_ppm,
            })),
            available: Mutex::new(true),
            dependents: Mutex::new(Vec::new()),
        }))
    }

    /// Clock locked to its parent by a single correlation and a rate.
    pub fn correlated(
        parent: &Arc<Clock>,
        tick_rate: f64,
        correlation: Correlation,
    ) -> ClockResult<Arc<Self>> {
        Self::new_correlated(parent, tick_rate, correlation, false)
    }

    /// Correlated clock whose speed and tick rate can be changed without a
    /// jump in its tick value: the correlation is re-based to the current
    /// tick value before each such change.
    pub fn tunable(
        parent: &Arc<Clock>,
        tick_rate: f64,
        start_ticks: f64,
    ) -> ClockResult<Arc<Self>> {
        let correlation = Correlation::new(parent.ticks(), start_ticks);
        Self::new_correlated(parent, tick_rate, correlation, true)
    }

    fn new_correlated(
        parent: &Arc<Clock>,
        tick_rate: f64,
        correlation: Correlation,
        tunable: bool,
    ) -> ClockResult<Arc<Self>> {
        check_tick_rate(tick_rate)?;
        let clock = Arc::new(Clock {
            kind: Mutex::new(Kind::Correlated(CorrelatedState {
                parent: parent.clone(),
                tick_rate,
                speed: 1.0,
                correlation,
                tunable,
            })),
            available: Mutex::new(true),
            dependents: Mutex::new(Vec::new()),
        });
        parent.bind(&clock);
        Ok(clock)
    }

    /// Clock whose relationship to its parent is the line through two
    /// correlations. The tick rate is advisory.
    pub fn range_correlated(
        parent: &Arc<Clock>,
        tick_rate: f64,
        correlation1: Correlation,
        correlation2: Correlation,
    ) -> ClockResult<Arc<Self>> {
        check_tick_rate(tick_rate)?;
        let clock = Arc::new(Clock {
            kind: Mutex::new(Kind::RangeCorrelated(RangeCorrelatedState {
                parent: parent.clone(),
                tick_rate,
                correlation1,
                correlation2,
            })),
            available: Mutex::new(true),
            dependents: Mutex::new(Vec::new()),
        });
        parent.bind(&clock);
        Ok(clock)
    }

    /// Clock identical to its parent except that it reads a time a fixed
    /// number of seconds ahead (positive offset) or behind (negative).
    pub fn offset(parent: &Arc<Clock>, offset_secs: f64) -> Arc<Self> {
        let clock = Arc::new(Clock {
            kind: Mutex::new(Kind::Offset(OffsetState {
                parent: parent.clone(),
                offset_secs,
            })),
            available: Mutex::new(true),
            dependents: Mutex::new(Vec::new()),
        });
        parent.bind(&clock);
        clock
    }

    // ------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------

    /// The kind of this clock node.
    pub fn kind(&self) -> ClockKind {
        match &*self.kind.lock().unwrap() {
            Kind::System(_) => ClockKind::System,
            Kind::Correlated(c) => {
                if c.tunable {
                    ClockKind::Tunable
                } else {
                    ClockKind::Correlated
                }
            }
            Kind::RangeCorrelated(_) => ClockKind::RangeCorrelated,
            Kind::Offset(_) => ClockKind::Offset,
        }
    }

    /// Current tick count.
    pub fn ticks(&self) -> f64 {
        match &*self.kind.lock().unwrap() {
            Kind::System(s) => (s.source.now() * s.tick_rate).trunc(),
            Kind::Correlated(c) => c.from_parent(c.parent.ticks()),
            Kind::RangeCorrelated(r) => r.from_parent(r.parent.ticks()),
            Kind::Offset(o) => o.from_parent(o.parent.ticks()),
        }
    }

    /// Tick rate in ticks per second. For offset clocks this is the parent's
    /// tick rate; for range-correlated clocks it is advisory.
    pub fn tick_rate(&self) -> f64 {
        match &*self.kind.lock().unwrap() {
            Kind::System(s) => s.tick_rate,
            Kind::Correlated(c) => c.tick_rate,
            Kind::RangeCorrelated(r) => r.tick_rate,
            Kind::Offset(o) => o.parent.tick_rate(),
        }
    }

    /// This clock's own speed multiplier relative to its parent.
    pub fn speed(&self) -> f64 {
        match &*self.kind.lock().unwrap() {
            Kind::Correlated(c) => c.speed,
            _ => 1.0,
        }
    }

    /// The product of the speed of this clock and all of its ancestors.
    pub fn effective_speed(&self) -> f64 {
        let mut speed = self.speed();
        let mut parent = self.parent();
        while let Some(p) = parent {
            speed *= p.speed();
            parent = p.parent();
        }
        speed
    }

    /// The parent clock, or `None` for a root.
    pub fn parent(&self) -> Option<Arc<Clock>> {
        match &*self.kind.lock().unwrap() {
            Kind::System(_) => None,
            Kind::Correlated(c) => Some(c.parent.clone()),
            Kind::RangeCorrelated(r) => Some(r.parent.clone()),
            Kind::Offset(o) => Some(o.parent.clone()),
        }
    }

    /// Current tick count converted to nanoseconds at the current tick rate
    /// (the speed property is not involved).
    pub fn nanos(&self) -> f64 {
        self.ticks() * 1e9 / self.tick_rate()
    }

    /// Convert a nanosecond value to ticks at the current tick rate.
    pub fn nanos_to_ticks(&self, nanos: f64) -> f64 {
        nanos * self.tick_rate() / 1e9
    }

    /// The current correlation, for correlated and tunable clocks.
    pub fn correlation(&self) -> Option<Correlation> {
        match &*self.kind.lock().unwrap() {
            Kind::Correlated(c) => Some(c.correlation),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Conversion
    // ------------------------------------------------------------------

    /// Convert a tick value of this clock to the parent's timescale.
    ///
    /// Returns NaN for a root clock, or for a zero-speed clock queried away
    /// from its correlation point.
    pub fn to_parent_ticks(&self, ticks: f64) -> f64 {
        match &*self.kind.lock().unwrap() {
            Kind::System(_) => f64::NAN,
            Kind::Correlated(c) => c.to_parent(ticks),
            Kind::RangeCorrelated(r) => r.to_parent(ticks),
            Kind::Offset(o) => o.to_parent(ticks),
        }
    }

    /// Convert a tick value of the parent clock to this clock's timescale.
    /// Returns NaN for a root clock.
    pub fn from_parent_ticks(&self, ticks: f64) -> f64 {
        match &*self.kind.lock().unwrap() {
            Kind::System(_) => f64::NAN,
            Kind::Correlated(c) => c.from_parent(ticks),
            Kind::RangeCorrelated(r) => r.from_parent(ticks),
            Kind::Offset(o) => o.from_parent(ticks),
        }
    }

    /// The chain `[self, parent, grandparent, …, root]`.
    pub fn ancestry(self: &Arc<Self>) -> Vec<Arc<Clock>> {
        let mut chain = vec![self.clone()];
        while let Some(p) = chain.last().and_then(|c| c.parent()) {
            chain.push(p);
        }
        chain
    }

    /// The root of this clock's tree.
    pub fn root(self: &Arc<Self>) -> Arc<Clock> {
        let mut clock = self.clone();
        while let Some(p) = clock.parent() {
            clock = p;
        }
        clock
    }

    /// Convert a tick value of this clock to the root clock's timescale.
    pub fn to_root_ticks(self: &Arc<Self>, ticks: f64) -> f64 {
        let chain = self.ancestry();
        let mut t = ticks;
        for clock in &chain[..chain.len() - 1] {
            t = clock.to_parent_ticks(t);
        }
        t
    }

    /// Convert a tick value of the root clock to this clock's timescale.
    pub fn from_root_ticks(self: &Arc<Self>, ticks: f64) -> f64 {
        let chain = self.ancestry();
        let mut t = ticks;
        for clock in chain[..chain.len() - 1].iter().rev() {
            t = clock.from_parent_ticks(t);
        }
        t
    }

    /// Convert a tick value of this clock to the timescale of any other
    /// clock sharing a common ancestor.
    ///
    /// The shared ancestry suffix is stripped, the remaining chain of this
    /// clock is walked upwards with [`Clock::to_parent_ticks`], and the other
    /// clock's remaining chain is walked downwards with
    /// [`Clock::from_parent_ticks`].
    pub fn to_other_clock_ticks(
        self: &Arc<Self>,
        other: &Arc<Clock>,
        ticks: f64,
    ) -> ClockResult<f64> {
        let mut ours = self.ancestry();
        let mut theirs = other.ancestry();

        let mut common = false;
        while let (Some(a), Some(b)) = (ours.last(), theirs.last()) {
            if Arc::ptr_eq(a, b) {
                ours.pop();
                theirs.pop();
                common = true;
            } else {
                break;
            }
        }
        if !common {
            return Err(ClockError::NoCommonClock);
        }

        let mut t = ticks;
        for clock in &ours {
            t = clock.to_parent_ticks(t);
        }
        for clock in theirs.iter().rev() {
            t = clock.from_parent_ticks(t);
        }
        Ok(t)
    }

    /// Map a tick value of this clock to an instant (seconds) on the
    /// monotonic time source underlying the root clock.
    pub fn calc_when(&self, ticks: f64) -> f64 {
        match &*self.kind.lock().unwrap() {
            Kind::System(s) => ticks / s.tick_rate,
            Kind::Correlated(c) => c.parent.calc_when(c.to_parent(ticks)),
            Kind::RangeCorrelated(r) => r.parent.calc_when(r.to_parent(ticks)),
            Kind::Offset(o) => o.parent.calc_when(o.to_parent(ticks)),
        }
    }

    /// Current reading, in seconds, of the monotonic time source underlying
    /// the root of this clock's tree.
    pub fn source_time(self: &Arc<Self>) -> f64 {
        match &*self.root().kind.lock().unwrap() {
            Kind::System(s) => s.source.now(),
            _ => f64::NAN,
        }
    }

    /// The monotonic time source underlying the root of this clock's tree,
    /// if the root is a system clock.
    pub fn root_source(self: &Arc<Self>) -> Option<Arc<dyn MonotonicTimeSource>> {
        match &*self.root().kind.lock().unwrap() {
            Kind::System(s) => Some(s.source.clone()),
            _ => None,
        }
    }

    /// The maximum frequency error (ppm) of the root clock of this tree.
    pub fn root_max_freq_error(self: &Arc<Self>) -> f64 {
        match &*self.root().kind.lock().unwrap() {
            Kind::System(s) => s.max_freq_error_ppm,
            _ => DEFAULT_MAX_FREQ_ERROR_PPM,
        }
    }

    // ------------------------------------------------------------------
    // Dispersion
    // ------------------------------------------------------------------

    /// The maximum-error envelope, in seconds, of this clock's estimate of
    /// time when its tick value reads `ticks`.
    ///
    /// This is the clock's own error contribution plus the parent's
    /// dispersion at the equivalent parent time. For a root it is the
    /// measurement precision of the underlying source.
    pub fn dispersion_at_time(&self, ticks: f64) -> f64 {
        match &*self.kind.lock().unwrap() {
            Kind::System(s) => s.precision_secs,
            Kind::Correlated(c) => {
                c.error_at(ticks) + c.parent.dispersion_at_time(c.to_parent(ticks))
            }
            Kind::RangeCorrelated(r) => {
                r.error_at(ticks) + r.parent.dispersion_at_time(r.to_parent(ticks))
            }
            Kind::Offset(o) => o.parent.dispersion_at_time(o.to_parent(ticks)),
        }
    }

    /// Current dispersion, i.e. `dispersion_at_time(ticks())`.
    pub fn dispersion(&self) -> f64 {
        self.dispersion_at_time(self.ticks())
    }

    // ------------------------------------------------------------------
    // Availability
    // ------------------------------------------------------------------

    /// Whether this clock is effectively available: its own flag and every
    /// ancestor's flag must be set.
    pub fn is_available(&self) -> bool {
        *self.available.lock().unwrap() && self.parent().map_or(true, |p| p.is_available())
    }

    /// Set this clock's own availability flag.
    ///
    /// A notification fires only when the effective availability actually
    /// changes, taking ancestors into account. Not supported on system
    /// clocks.
    pub fn set_availability(self: &Arc<Self>, available: bool) -> ClockResult<()> {
        if matches!(&*self.kind.lock().unwrap(), Kind::System(_)) {
            return Err(ClockError::NotImplemented("availability"));
        }
        let changed = {
            let parent_available = self.parent().map_or(true, |p| p.is_available());
            let mut own = self.available.lock().unwrap();
            let before = *own && parent_available;
            *own = available;
            before != (available && parent_available)
        };
        if changed {
            self.notify();
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    /// Register an observer for change notifications. Observers are held by
    /// identity through weak references; dropping the observer unbinds it.
    pub fn bind<O>(&self, observer: &Arc<O>)
    where
        O: ClockObserver + 'static,
    {
        let weak: Weak<O> = Arc::downgrade(observer);
        let weak: Weak<dyn ClockObserver> = weak;
        self.dependents.lock().unwrap().push(weak);
    }

    /// Remove an observer registered with [`Clock::bind`], by identity.
    pub fn unbind<O>(&self, observer: &Arc<O>)
    where
        O: ClockObserver + 'static,
    {
        let target = Arc::as_ptr(observer) as *const ();
        self.dependents
            .lock()
            .unwrap()
            .retain(|w| w.strong_count() > 0 && w.as_ptr() as *const () != target);
    }

    /// Notify every observer of this clock that its timing changed, with
    /// this clock as the cause. Mutating operations call this internally.
    pub fn notify(self: &Arc<Self>) {
        self.notify_dependents(self);
    }

    fn notify_dependents(&self, cause: &Arc<Clock>) {
        let observers: Vec<Arc<dyn ClockObserver>> = {
            let mut deps = self.dependents.lock().unwrap();
            deps.retain(|w| w.strong_count() > 0);
            deps.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in observers {
            observer.clock_changed(cause);
        }
    }

    // ------------------------------------------------------------------
    // Mutation (correlated / tunable clocks)
    // ------------------------------------------------------------------

    /// Replace the correlation. Fires a notification if the value changed.
    pub fn set_correlation(self: &Arc<Self>, correlation: Correlation) -> ClockResult<()> {
        let changed = {
            match &mut *self.kind.lock().unwrap() {
                Kind::Correlated(c) => {
                    let changed = c.correlation != correlation;
                    c.correlation = correlation;
                    changed
                }
                _ => return Err(ClockError::NotImplemented("correlation")),
            }
        };
        if changed {
            self.notify();
        }
        Ok(())
    }

    /// Replace both correlations of a range-correlated clock.
    pub fn set_correlation_range(
        self: &Arc<Self>,
        correlation1: Correlation,
        correlation2: Correlation,
    ) -> ClockResult<()> {
        let changed = {
            match &mut *self.kind.lock().unwrap() {
                Kind::RangeCorrelated(r) => {
                    let changed =
                        r.correlation1 != correlation1 || r.correlation2 != correlation2;
                    r.correlation1 = correlation1;
                    r.correlation2 = correlation2;
                    changed
                }
                _ => return Err(ClockError::NotImplemented("correlation range")),
            }
        };
        if changed {
            self.notify();
        }
        Ok(())
    }

    /// Replace the correlation and speed together, firing at most one
    /// notification.
    pub fn set_correlation_and_speed(
        self: &Arc<Self>,
        correlation: Correlation,
        speed: f64,
    ) -> ClockResult<()> {
        let changed = {
            match &mut *self.kind.lock().unwrap() {
                Kind::Correlated(c) => {
                    let changed = c.correlation != correlation || c.speed != speed;
                    c.correlation = correlation;
                    c.speed = speed;
                    changed
                }
                _ => return Err(ClockError::NotImplemented("correlation")),
            }
        };
        if changed {
            self.notify();
        }
        Ok(())
    }

    /// Change the speed multiplier. On a tunable clock the correlation is
    /// first re-based to the current tick value so the tick count does not
    /// jump. Not supported on system, range-correlated or offset clocks.
    pub fn set_speed(self: &Arc<Self>, speed: f64) -> ClockResult<()> {
        if self.is_tunable() {
            self.rebase_correlation_at_ticks(self.ticks())?;
        }
        let changed = {
            match &mut *self.kind.lock().unwrap() {
                Kind::Correlated(c) => {
                    let changed = c.speed != speed;
                    c.speed = speed;
                    changed
                }
                _ => return Err(ClockError::NotImplemented("speed")),
            }
        };
        if changed {
            self.notify();
        }
        Ok(())
    }

    /// Change the tick rate. On a tunable clock the correlation is first
    /// re-based to the current tick value.
    pub fn set_tick_rate(self: &Arc<Self>, tick_rate: f64) -> ClockResult<()> {
        check_tick_rate(tick_rate)?;
        if self.is_tunable() {
            self.rebase_correlation_at_ticks(self.ticks())?;
        }
        let changed = {
            match &mut *self.kind.lock().unwrap() {
                Kind::Correlated(c) => {
                    let changed = c.tick_rate != tick_rate;
                    c.tick_rate = tick_rate;
                    changed
                }
                _ => return Err(ClockError::NotImplemented("tick rate")),
            }
        };
        if changed {
            self.notify();
        }
        Ok(())
    }

    /// Re-attach this clock to a different parent. Fires a notification if
    /// the parent actually changed.
    pub fn set_parent(self: &Arc<Self>, new_parent: &Arc<Clock>) -> ClockResult<()> {
        let changed = {
            let mut kind = self.kind.lock().unwrap();
            let slot = match &mut *kind {
                Kind::System(_) => return Err(ClockError::NotImplemented("parent")),
                Kind::Correlated(c) => &mut c.parent,
                Kind::RangeCorrelated(r) => &mut r.parent,
                Kind::Offset(o) => &mut o.parent,
            };
            if Arc::ptr_eq(slot, new_parent) {
                false
            } else {
                slot.unbind(self);
                *slot = new_parent.clone();
                new_parent.bind(self);
                true
            }
        };
        if changed {
            self.notify();
        }
        Ok(())
    }

    /// Shift the tick count of a tunable clock by `offset` ticks.
    pub fn adjust_ticks(self: &Arc<Self>, offset: f64) -> ClockResult<()> {
        {
            match &mut *self.kind.lock().unwrap() {
                Kind::Correlated(c) if c.tunable => {
                    c.correlation = c
                        .correlation
                        .with_child_ticks(c.correlation.child_ticks + offset);
                }
                _ => return Err(ClockError::NotImplemented("tick adjustment")),
            }
        }
        self.notify();
        Ok(())
    }

    /// Replace the correlation with an equivalent one whose child tick value
    /// is `ticks`, preserving the timing relationship.
    ///
    /// The error accumulated since the old correlation point is folded into
    /// the new correlation's initial error, so dispersion is unaffected. No
    /// notification fires: the mapping has not changed.
    pub fn rebase_correlation_at_ticks(self: &Arc<Self>, ticks: f64) -> ClockResult<()> {
        match &mut *self.kind.lock().unwrap() {
            Kind::Correlated(c) => {
                let parent_ticks = c.to_parent(ticks);
                let delta_secs = (parent_ticks - c.correlation.parent_ticks).abs()
                    / c.parent.tick_rate();
                let initial_error = c.correlation.initial_error
                    + delta_secs * c.correlation.error_growth_rate;
                c.correlation = Correlation::with_error(
                    parent_ticks,
                    ticks,
                    initial_error,
                    c.correlation.error_growth_rate,
                );
                Ok(())
            }
            _ => Err(ClockError::NotImplemented("correlation")),
        }
    }

    /// Change the offset, in seconds, of an offset clock.
    pub fn set_offset(self: &Arc<Self>, offset_secs: f64) -> ClockResult<()> {
        let changed = {
            match &mut *self.kind.lock().unwrap() {
                Kind::Offset(o) => {
                    let changed = o.offset_secs != offset_secs;
                    o.offset_secs = offset_secs;
                    changed
                }
                _ => return Err(ClockError::NotImplemented("offset")),
            }
        };
        if changed {
            self.notify();
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Comparison
    // ------------------------------------------------------------------

    /// How much a new correlation and speed would change this clock's
    /// timing, in seconds. A speed change is quantified as infinite.
    pub fn quantify_change(
        &self,
        new_correlation: &Correlation,
        new_speed: f64,
    ) -> ClockResult<f64> {
        match &*self.kind.lock().unwrap() {
            Kind::Correlated(c) => {
                if new_speed != c.speed {
                    return Ok(f64::INFINITY);
                }
                if new_speed != 0.0 {
                    let old_parent = c.to_parent(new_correlation.child_ticks);
                    Ok((new_correlation.parent_ticks - old_parent).abs() / c.parent.tick_rate())
                } else {
                    let old_child = c.from_parent(new_correlation.parent_ticks);
                    Ok((new_correlation.child_ticks - old_child).abs() / c.tick_rate)
                }
            }
            _ => Err(ClockError::NotImplemented("correlation")),
        }
    }

    /// Whether adopting a new correlation and speed would change this
    /// clock's timing by more than `threshold_secs`. Any change of speed is
    /// always significant.
    pub fn is_change_significant(
        &self,
        new_correlation: &Correlation,
        new_speed: f64,
        threshold_secs: f64,
    ) -> ClockResult<bool> {
        Ok(self.quantify_change(new_correlation, new_speed)? > threshold_secs)
    }

    /// Real-time divergence between this clock and another, in seconds.
    ///
    /// Infinite when the tick rates or effective speeds differ (the clocks
    /// diverge over time); otherwise the current offset.
    pub fn clock_diff(self: &Arc<Self>, other: &Arc<Clock>) -> f64 {
        let tick_rate = self.tick_rate();
        if tick_rate != other.tick_rate() || self.effective_speed() != other.effective_speed() {
            return f64::INFINITY;
        }
        let root_ticks = self.root().ticks();
        let ours = self.from_root_ticks(root_ticks);
        let theirs = other.from_root_ticks(root_ticks);
        (ours - theirs).abs() / tick_rate
    }

    fn is_tunable(&self) -> bool {
        matches!(&*self.kind.lock().unwrap(), Kind::Correlated(c) if c.tunable)
    }
}

impl ClockObserver for Clock {
    /// Propagate an ancestor's change to this clock's own observers,
    /// preserving the original cause.
    fn clock_changed(&self, cause: &Arc<Clock>) {
        self.notify_dependents(cause);
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clock")
            .field("kind", &self.kind())
            .field("ticks", &self.ticks())
            .field("tick_rate", &self.tick_rate())
            .finish()
    }
}

// ----------------------------------------------------------------------
// Per-kind conversion maths
// ----------------------------------------------------------------------

impl CorrelatedState {
    fn from_parent(&self, ticks: f64) -> f64 {
        self.correlation.child_ticks
            + (ticks - self.correlation.parent_ticks) * self.tick_rate * self.speed
                / self.parent.tick_rate()
    }

    fn to_parent(&self, ticks: f64) -> f64 {
        if self.speed == 0.0 {
            // The inverse mapping only exists at the correlation point.
            if ticks == self.correlation.child_ticks {
                self.correlation.parent_ticks
            } else {
                f64::NAN
            }
        } else {
            self.correlation.parent_ticks
                + (ticks - self.correlation.child_ticks) * self.parent.tick_rate()
                    / self.tick_rate
                    / self.speed
        }
    }

    fn error_at(&self, ticks: f64) -> f64 {
        let parent_ticks = self.to_parent(ticks);
        let delta_secs =
            (parent_ticks - self.correlation.parent_ticks).abs() / self.parent.tick_rate();
        self.correlation.initial_error + delta_secs * self.correlation.error_growth_rate
    }
}

impl RangeCorrelatedState {
    fn from_parent(&self, ticks: f64) -> f64 {
        (ticks - self.correlation1.parent_ticks)
            * (self.correlation2.child_ticks - self.correlation1.child_ticks)
            / (self.correlation2.parent_ticks - self.correlation1.parent_ticks)
            + self.correlation1.child_ticks
    }

    fn to_parent(&self, ticks: f64) -> f64 {
        (ticks - self.correlation1.child_ticks)
            * (self.correlation2.parent_ticks - self.correlation1.parent_ticks)
            / (self.correlation2.child_ticks - self.correlation1.child_ticks)
            + self.correlation1.parent_ticks
    }

    fn error_at(&self, ticks: f64) -> f64 {
        let parent_ticks = self.to_parent(ticks);
        let parent_rate = self.parent.tick_rate();
        let err = |c: &Correlation| {
            c.initial_error
                + (parent_ticks - c.parent_ticks).abs() / parent_rate * c.error_growth_rate
        };
        err(&self.correlation1).min(err(&self.correlation2))
    }
}

impl OffsetState {
    fn offset_ticks(&self) -> f64 {
        self.offset_secs * self.parent.effective_speed() * self.parent.tick_rate()
    }

    fn from_parent(&self, ticks: f64) -> f64 {
        ticks + self.offset_ticks()
    }

    fn to_parent(&self, ticks: f64) -> f64 {
        ticks - self.offset_ticks()
    }
}

// ----------------------------------------------------------------------
// Precision measurement
// ----------------------------------------------------------------------

/// Estimate the measurement precision of a clock, in seconds, by sampling
/// the smallest observable positive difference in its tick count.
pub fn measure_precision(clock: &Clock, sample_size: usize) -> f64 {
    let tick_rate = clock.tick_rate();
    let mut smallest = f64::INFINITY;
    let mut found = 0;
    // Bounded so a frozen clock cannot hang the caller.
    for _ in 0..sample_size.saturating_mul(1000) {
        if found >= sample_size {
            break;
        }
        let a = clock.ticks();
        let b = clock.ticks();
        if b > a {
            smallest = smallest.min(b - a);
            found += 1;
        }
    }
    if smallest.is_finite() {
        smallest / tick_rate
    } else {
        1.0 / tick_rate
    }
}

fn measure_source_precision(source: &dyn MonotonicTimeSource, tick_rate: f64) -> f64 {
    let mut smallest = f64::INFINITY;
    let mut found = 0;
    for _ in 0..PRECISION_SAMPLES.saturating_mul(1000) {
        if found >= PRECISION_SAMPLES {
            break;
        }
        let a = (source.now() * tick_rate).trunc();
        let b = (source.now() * tick_rate).trunc();
        if b > a {
            smallest = smallest.min(b - a);
            found += 1;
        }
    }
    if smallest.is_finite() {
        smallest / tick_rate
    } else {
        1.0 / tick_rate
    }
}
