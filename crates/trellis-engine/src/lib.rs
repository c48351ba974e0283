//! Timeline execution engine: trial and timeline nodes, sampling, validation.
//!
//! This crate implements the core Trellis runner: expansion of declarative
//! timeline descriptions into trial and timeline nodes, sequential execution
//! with pause/resume/abort, repetition and looping, variable-set sampling,
//! parameter resolution, progress estimation and JSON loading.

pub mod description;
pub mod environment;
pub mod events;
pub mod executor;
pub mod loader;
pub mod node;
pub mod progress;
pub mod resolver;
pub mod sampling;
pub mod timeline;
pub mod trial;
pub mod validation;

mod sync;

pub use description::{
    is_built_in_parameter, ConditionalFn, CustomSampleFn, LoopFn, NodeDescription,
    SampleDescription, TimelineCallback, TimelineDescription, TrialDescription,
    BUILT_IN_PARAMETERS,
};
pub use environment::{EngineConfig, Environment, EnvironmentBuilder};
pub use events::{EventEmitter, TimelineEvent};
pub use executor::{ScriptedExecutor, SimulatedExecutor, TrialExecutor};
pub use loader::{load_description, load_description_file, parse_root};
pub use node::Node;
pub use progress::{naive_trial_count, progress_fraction};
pub use resolver::ResolveOptions;
pub use sampling::{
    variable_set_order, RandomSampler, Randomizer, SampleOptions, SampleStrategy, Sampler,
};
pub use timeline::TimelineNode;
pub use trial::TrialNode;
pub use validation::{validate, validate_or_raise, Diagnostic, LintRule, Severity};
