//! Macro-form: the ordered sections a piece moves through.
//!
//! A [`FormPlan`] lists stages and how long each lasts, either in bars or
//! in beats. The [`Conductor`] is the only writer of the section on the
//! bus. It counts bars, moves the form along and emits a [`Cue`] each time
//! a section is entered.

use crate::bus::SectionAuthority;
use crate::timing::{BeatTime, Beats, TimeSignature};
use crate::voice::{StepContext, Voice};
use crate::{Error, Result};
use std::str::FromStr;

/// Every section any piece uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Section {
    Intro,
    Groove,
    Axis,
    Edict,
    Dissolve,
    Rise,
    Ritual,
    Winddown,
    Descent,
    Sleep,
}

impl Section {
    pub const ALL: [Section; 10] = [
        Section::Intro,
        Section::Groove,
        Section::Axis,
        Section::Edict,
        Section::Dissolve,
        Section::Rise,
        Section::Ritual,
        Section::Winddown,
        Section::Descent,
        Section::Sleep,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Section::Intro => "intro",
            Section::Groove => "groove",
            Section::Axis => "axis",
            Section::Edict => "edict",
            Section::Dissolve => "dissolve",
            Section::Rise => "rise",
            Section::Ritual => "ritual",
            Section::Winddown => "winddown",
            Section::Descent => "descent",
            Section::Sleep => "sleep",
        }
    }
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Section {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Section::ALL
            .into_iter()
            .find(|section| section.name() == wanted)
            .ok_or_else(|| Error::Config(format!("Unknown section '{s}'")))
    }
}

/// How long a stage lasts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Span {
    /// Until the bar counter has advanced this many bars.
    Bars(u64),
    /// For this long after entry.
    Beats(Beats),
    Forever,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Stage {
    pub section: Section,
    pub span: Span,
}

impl Stage {
    pub fn new(section: Section, span: Span) -> Self {
        Self { section, span }
    }
}

/// What happens after the last stage.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Ending {
    /// Stay in the last stage forever.
    Hold,
    /// Jump back to stage `to` and start another pass.
    Cycle { to: usize },
}

/// Ordered stages plus ending behavior.
///
/// Only [`FormPlan::new`] and [`FormPlan::from_bar_thresholds`] build a
/// plan, so it always has a stage and any cycle target is in range.
///
/// ```compile_fail
/// use undertow_core::{Ending, FormPlan, TimeSignature};
///
/// let plan = FormPlan {
///     stages: vec![],
///     ending: Ending::Hold,
///     signature: TimeSignature::default(),
/// };
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct FormPlan {
    stages: Vec<Stage>,
    ending: Ending,
    signature: TimeSignature,
}

impl FormPlan {
    pub fn new(stages: Vec<Stage>, ending: Ending) -> Result<Self> {
        if stages.is_empty() {
            return Err(Error::Config("Form plan needs at least one stage".into()));
        }
        if let Ending::Cycle { to } = ending {
            if to >= stages.len() {
                return Err(Error::Config(format!(
                    "Cycle target {to} is outside the {} stages",
                    stages.len()
                )));
            }
        }
        Ok(Self {
            stages,
            ending,
            signature: TimeSignature::default(),
        })
    }

    /// Counter-based plan from `(first_bar, section)` thresholds.
    ///
    /// Thresholds must start at bar 1 and increase strictly. The last
    /// section holds.
    pub fn from_bar_thresholds(thresholds: &[(u64, Section)]) -> Result<Self> {
        match thresholds.first() {
            Some((1, _)) => {}
            _ => return Err(Error::Config("Bar thresholds must start at bar 1".into())),
        }
        let mut stages = Vec::with_capacity(thresholds.len());
        for pair in thresholds.windows(2) {
            let (start, section) = pair[0];
            let (next, _) = pair[1];
            if next <= start {
                return Err(Error::Config(format!(
                    "Bar thresholds must increase ({start} then {next})"
                )));
            }
            stages.push(Stage::new(section, Span::Bars(next - start)));
        }
        if let Some(&(_, last)) = thresholds.last() {
            stages.push(Stage::new(last, Span::Forever));
        }
        Self::new(stages, Ending::Hold)
    }

    pub fn initial(&self) -> Section {
        self.stages[0].section
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn ending(&self) -> Ending {
        self.ending
    }

    pub fn signature(&self) -> TimeSignature {
        self.signature
    }
}

/// Notification emitted on entering a section.
#[derive(Clone, Debug, PartialEq)]
pub struct Cue {
    /// `"<section>_start"`.
    pub name: String,
    pub section: Section,
    pub at: BeatTime,
    pub bar: u64,
    /// Completed passes through a cyclic form.
    pub pass: u64,
}

/// Position within a [`FormPlan`].
#[derive(Clone, Debug)]
pub struct Form {
    plan: FormPlan,
    index: usize,
    entered_at: BeatTime,
    entered_bar: u64,
    pass: u64,
}

impl Form {
    pub fn new(plan: FormPlan) -> Self {
        Self {
            plan,
            index: 0,
            entered_at: BeatTime::ZERO,
            entered_bar: 1,
            pass: 0,
        }
    }

    pub fn current(&self) -> Section {
        self.plan.stages[self.index].section
    }

    pub fn pass(&self) -> u64 {
        self.pass
    }

    pub fn plan(&self) -> &FormPlan {
        &self.plan
    }

    /// Restart the current stage's clock, used for the very first entry.
    pub fn reset(&mut self, bar: u64, at: BeatTime) {
        self.index = 0;
        self.entered_bar = bar;
        self.entered_at = at;
    }

    /// When a beat-timed stage ends, if the current one is.
    pub fn deadline(&self) -> Option<BeatTime> {
        match self.plan.stages[self.index].span {
            Span::Beats(d) => Some(self.entered_at + d.sanitized()),
            _ => None,
        }
    }

    /// Take at most one transition if the current stage is over.
    pub fn poll(&mut self, bar: u64, now: BeatTime) -> Option<Section> {
        let entered_at = match self.plan.stages[self.index].span {
            Span::Forever => return None,
            Span::Bars(n) => {
                if bar < self.entered_bar.saturating_add(n) {
                    return None;
                }
                now
            }
            Span::Beats(_) => {
                let deadline = self.deadline()?;
                if now < deadline {
                    return None;
                }
                deadline
            }
        };

        let next = self.index + 1;
        self.index = if next < self.plan.stages.len() {
            next
        } else {
            match self.plan.ending {
                Ending::Hold => return None,
                Ending::Cycle { to } => {
                    self.pass += 1;
                    to
                }
            }
        };
        self.entered_at = entered_at;
        self.entered_bar = bar;
        Some(self.current())
    }
}

/// The voice that owns the section.
pub struct Conductor {
    form: Form,
    authority: SectionAuthority,
    bar: u64,
    next_bar_at: BeatTime,
    started: bool,
}

impl Conductor {
    pub fn new(plan: FormPlan, authority: SectionAuthority) -> Self {
        Self {
            form: Form::new(plan),
            authority,
            bar: 0,
            next_bar_at: BeatTime::ZERO,
            started: false,
        }
    }

    pub fn section(&self) -> Section {
        self.form.current()
    }

    fn enter(&mut self, ctx: &mut StepContext<'_>, section: Section) {
        let now = ctx.now();
        ctx.bus_mut().enter_section(&self.authority, section, now);
        log::info!(
            "[FORM] bar {} @{:.2}: entering {} (pass {})",
            self.bar,
            now.to_float(),
            section,
            self.form.pass()
        );
        ctx.cue(Cue {
            name: format!("{section}_start"),
            section,
            at: now,
            bar: self.bar,
            pass: self.form.pass(),
        });
    }
}

impl Voice for Conductor {
    fn name(&self) -> &str {
        "conductor"
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<Beats> {
        let now = ctx.now();
        let bar_length = self.form.plan().signature().bar();

        if !self.started {
            self.started = true;
            self.bar = 1;
            self.next_bar_at = now + bar_length;
            self.form.reset(self.bar, now);
            ctx.bus_mut().set_bar(&self.authority, self.bar);
            let initial = self.form.current();
            self.enter(ctx, initial);
        } else if now >= self.next_bar_at {
            self.bar += 1;
            self.next_bar_at = self.next_bar_at + bar_length;
            ctx.bus_mut().set_bar(&self.authority, self.bar);
        }

        // Zero-length stages may chain; one full lap is the most we take.
        for _ in 0..self.form.plan().stages().len() {
            match self.form.poll(self.bar, now) {
                Some(section) => self.enter(ctx, section),
                None => break,
            }
        }

        let mut wake = self.next_bar_at;
        if let Some(deadline) = self.form.deadline() {
            if deadline > now && deadline < wake {
                wake = deadline;
            }
        }
        Ok(wake.since(now))
    }
}
