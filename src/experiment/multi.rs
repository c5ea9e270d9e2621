//! Multi-configuration experiment driver: clones a base experiment per
//! configuration, applies factors, runs (optionally on a worker pool), and
//! aggregates numeric results across replications.

use rayon::prelude::*;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::error::SimError;
use crate::core::results::{ResultMap, ResultValue};
use crate::experiment::{Experiment, FactorValue};
use crate::stats::SummaryStat;

/// Reserved configuration key selecting an alternative clone template.
/// Never applied as a property.
pub const KEY_EXPERIMENT: &str = "@";

/// Vetoes configurations whose factor combinations make no sense. Rejected
/// configurations are skipped silently.
pub type ConfigurationValidator = Arc<dyn Fn(&Configuration) -> bool + Send + Sync>;

/// An ordered set of property-path → value assignments specializing a base
/// experiment.
#[derive(Clone, Default)]
pub struct Configuration {
    entries: Vec<(String, FactorValue)>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<FactorValue>) -> Self {
        self.entries.push((key.into(), value.into()));
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<FactorValue>) {
        self.entries.push((key.into(), value.into()));
    }

    pub fn get(&self, key: &str) -> Option<&FactorValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stable textual identity used to group replications.
    pub fn signature(&self) -> String {
        if self.entries.is_empty() {
            return "<default>".to_string();
        }
        let parts: Vec<String> = self
            .entries
            .iter()
            .map(|(k, v)| format!("{k}={v:?}"))
            .collect();
        parts.join(";")
    }

    /// Entries in application order: ascending key length, so a containing
    /// object is assigned before its sub-properties. The template key sorts
    /// first (length −2) but is never applied. Length ties keep insertion
    /// order.
    fn ordered_entries(&self) -> Vec<&(String, FactorValue)> {
        let mut entries: Vec<&(String, FactorValue)> = self.entries.iter().collect();
        entries.sort_by_key(|(k, _)| effective_key_len(k));
        entries
    }
}

impl std::fmt::Debug for Configuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Configuration({})", self.signature())
    }
}

fn effective_key_len(key: &str) -> i64 {
    if key == KEY_EXPERIMENT {
        -2
    } else {
        key.len() as i64
    }
}

/// Applies a configuration's factors to a cloned experiment.
pub fn apply_configuration(
    exp: &mut dyn Experiment,
    conf: &Configuration,
) -> Result<(), SimError> {
    for (key, value) in conf.ordered_entries() {
        if key == KEY_EXPERIMENT {
            continue;
        }
        match value {
            FactorValue::Setter(setter) => setter(exp)?,
            other => exp.set_property(key, other)?,
        }
    }
    Ok(())
}

/// Runs many configurations of a base experiment and aggregates their
/// results.
///
/// Per-configuration failures are isolated: the failing run's result map
/// carries `EXCEPTION` / `EXCEPTION_MESSAGE` and counts into `abortCount`,
/// and the sweep continues.
#[derive(Clone)]
pub struct MultiConfExperiment {
    pub base: Option<Box<dyn Experiment>>,
    configurations: Vec<Configuration>,
    validator: Option<ConfigurationValidator>,
    replications: usize,
    /// Property path receiving `base_seed + replication` before each run.
    seed_property: Option<String>,
    base_seed: u64,
    parallel: bool,
}

impl MultiConfExperiment {
    pub fn new() -> Self {
        Self {
            base: None,
            configurations: Vec::new(),
            validator: None,
            replications: 1,
            seed_property: None,
            base_seed: 0,
            parallel: false,
        }
    }

    pub fn with_base(mut self, base: Box<dyn Experiment>) -> Self {
        self.base = Some(base);
        self
    }

    pub fn with_configuration(mut self, conf: Configuration) -> Self {
        self.configurations.push(conf);
        self
    }

    pub fn add_configuration(&mut self, conf: Configuration) {
        self.configurations.push(conf);
    }

    pub fn with_validator(mut self, validator: ConfigurationValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_replications(mut self, n: usize) -> Self {
        assert!(n >= 1, "at least one replication per configuration");
        self.replications = n;
        self
    }

    pub fn with_seed_property(mut self, path: impl Into<String>) -> Self {
        self.seed_property = Some(path.into());
        self
    }

    pub fn with_base_seed(mut self, seed: u64) -> Self {
        self.base_seed = seed;
        self
    }

    /// Dispatches replications to a rayon worker pool. Every worker owns a
    /// disjoint clone; results are merged in configuration order, so the
    /// output is identical to a sequential sweep.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn num_configurations(&self) -> usize {
        self.configurations.len()
    }

    /// Executes the sweep.
    pub fn run(&mut self) -> Result<ResultMap, SimError> {
        let valid: Vec<&Configuration> = self
            .configurations
            .iter()
            .filter(|c| self.validator.as_ref().map_or(true, |v| v(c)))
            .collect();

        if self.base.is_none() && valid.iter().any(|c| c.get(KEY_EXPERIMENT).is_none()) {
            return Err(SimError::Configuration(
                "no base experiment set and not every configuration carries one".into(),
            ));
        }

        // clone + configure sequentially; run in parallel if requested
        let mut prepared: Vec<(String, Result<Box<dyn Experiment>, SimError>)> = Vec::new();
        for conf in &valid {
            for rep in 0..self.replications {
                prepared.push((conf.signature(), self.prepare(conf, rep)));
            }
        }

        let run_one = |entry: (String, Result<Box<dyn Experiment>, SimError>)| {
            let (sig, outcome) = entry;
            let rm = match outcome {
                Ok(mut exp) => exp.run().unwrap_or_else(|err| aborted_result(&err)),
                Err(err) => aborted_result(&err),
            };
            (sig, rm)
        };

        let runs: Vec<(String, ResultMap)> = if self.parallel {
            prepared.into_par_iter().map(run_one).collect()
        } else {
            prepared.into_iter().map(run_one).collect()
        };

        let aborts: i64 = runs
            .iter()
            .filter_map(|(_, rm)| rm.num("abortCount"))
            .sum::<f64>() as i64;
        if aborts > 0 {
            warn!(aborts, "sweep finished with aborted runs");
        }
        info!(configs = valid.len(), runs = runs.len(), "sweep done");

        self.aggregate(valid.len(), runs, aborts)
    }

    fn prepare(
        &self,
        conf: &Configuration,
        replication: usize,
    ) -> Result<Box<dyn Experiment>, SimError> {
        let mut exp = match conf.get(KEY_EXPERIMENT) {
            Some(FactorValue::Experiment(template)) => template.clone_exp(),
            Some(_) => {
                return Err(SimError::Configuration(format!(
                    "value under {KEY_EXPERIMENT:?} is not an experiment"
                )))
            }
            None => self
                .base
                .as_ref()
                .expect("base presence checked before prepare")
                .clone_exp(),
        };

        apply_configuration(exp.as_mut(), conf)?;

        if let Some(path) = &self.seed_property {
            let seed = self.base_seed.wrapping_add(replication as u64);
            exp.set_property(path, &FactorValue::Int(seed as i64))?;
        }
        Ok(exp)
    }

    fn aggregate(
        &self,
        num_confs: usize,
        runs: Vec<(String, ResultMap)>,
        aborts: i64,
    ) -> Result<ResultMap, SimError> {
        let mut per_signature: BTreeMap<String, BTreeMap<String, SummaryStat>> = BTreeMap::new();
        let mut per_run = ResultMap::new();

        for (i, (sig, rm)) in runs.iter().enumerate() {
            per_run.put(format!("conf{i}"), rm.clone())?;

            let stats = per_signature.entry(sig.clone()).or_default();
            let mut numeric = Vec::new();
            flatten_numeric("", rm, &mut numeric);
            for (key, v) in numeric {
                stats.entry(key).or_default().add(v);
            }
        }

        let mut aggregates = ResultMap::new();
        for (sig, stats) in per_signature {
            let mut columns = ResultMap::new();
            for (key, stat) in stats {
                columns.put(key, stat.to_result_map())?;
            }
            aggregates.put(sig, columns)?;
        }

        let mut out = ResultMap::new();
        out.put("numConfs", num_confs as i64)?;
        out.put("numRuns", per_run.len() as i64)?;
        out.put("abortCount", aborts)?;
        out.put("runs", per_run)?;
        out.put("aggregates", aggregates)?;
        Ok(out)
    }
}

impl Default for MultiConfExperiment {
    fn default() -> Self {
        Self::new()
    }
}

impl Experiment for MultiConfExperiment {
    fn run(&mut self) -> Result<ResultMap, SimError> {
        MultiConfExperiment::run(self)
    }

    fn set_property(&mut self, path: &str, value: &FactorValue) -> Result<(), SimError> {
        match path {
            "replications" => {
                let v = value.as_i64().ok_or(SimError::TypeMismatch {
                    path: path.into(),
                    expected: "integer",
                })?;
                if v < 1 {
                    return Err(SimError::Configuration(
                        "replications must be at least 1".into(),
                    ));
                }
                self.replications = v as usize;
            }
            "baseSeed" => {
                let v = value.as_i64().ok_or(SimError::TypeMismatch {
                    path: path.into(),
                    expected: "integer",
                })?;
                self.base_seed = v as u64;
            }
            "parallel" => {
                self.parallel = value.as_bool().ok_or(SimError::TypeMismatch {
                    path: path.into(),
                    expected: "bool",
                })?;
            }
            _ => return Err(SimError::UnknownProperty(path.into())),
        }
        Ok(())
    }

    fn clone_exp(&self) -> Box<dyn Experiment> {
        Box::new(self.clone())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn aborted_result(err: &SimError) -> ResultMap {
    let mut rm = ResultMap::new();
    rm.set("EXCEPTION", format!("{err:?}"));
    rm.set("EXCEPTION_MESSAGE", err.to_string());
    rm.set("abortCount", 1i64);
    rm
}

/// Collects every numeric leaf of a result map under dotted keys.
fn flatten_numeric(prefix: &str, rm: &ResultMap, out: &mut Vec<(String, f64)>) {
    for (k, v) in rm {
        let key = if prefix.is_empty() {
            k.clone()
        } else {
            format!("{prefix}.{k}")
        };
        match v {
            ResultValue::Map(inner) => flatten_numeric(&key, inner, out),
            other => {
                if let Some(n) = other.as_num() {
                    out.push((key, n));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Experiment stub recording the order properties are applied in.
    #[derive(Clone, Default)]
    struct Recorder {
        applied: Vec<String>,
        fail_on: Option<String>,
    }

    impl Experiment for Recorder {
        fn run(&mut self) -> Result<ResultMap, SimError> {
            let mut rm = ResultMap::new();
            rm.set("applied", self.applied.join(","));
            rm.set("numApplied", self.applied.len() as i64);
            rm.set("abortCount", 0i64);
            Ok(rm)
        }

        fn set_property(&mut self, path: &str, _value: &FactorValue) -> Result<(), SimError> {
            if self.fail_on.as_deref() == Some(path) {
                return Err(SimError::Configuration(format!("cannot set {path}")));
            }
            self.applied.push(path.to_string());
            Ok(())
        }

        fn clone_exp(&self) -> Box<dyn Experiment> {
            Box::new(self.clone())
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn applied_of(rm: &ResultMap, run: usize) -> String {
        let runs = match rm.get("runs") {
            Some(ResultValue::Map(m)) => m,
            other => panic!("missing runs map: {other:?}"),
        };
        match runs.get(&format!("conf{run}")) {
            Some(ResultValue::Map(m)) => match m.get("applied") {
                Some(ResultValue::Str(s)) => s.clone(),
                other => panic!("missing applied entry: {other:?}"),
            },
            other => panic!("missing run map: {other:?}"),
        }
    }

    #[test]
    fn containing_objects_are_set_before_sub_properties() {
        let conf = Configuration::new()
            .with("a.b", 1.0)
            .with("a", 2.0)
            .with("a.b.c", 3.0);

        let mut sweep = MultiConfExperiment::new()
            .with_base(Box::new(Recorder::default()))
            .with_configuration(conf);

        let rm = sweep.run().unwrap();
        assert_eq!(applied_of(&rm, 0), "a,a.b,a.b.c");
    }

    #[test]
    fn equal_length_keys_keep_insertion_order() {
        let conf = Configuration::new().with("bb", 1.0).with("aa", 2.0);
        let mut sweep = MultiConfExperiment::new()
            .with_base(Box::new(Recorder::default()))
            .with_configuration(conf);

        let rm = sweep.run().unwrap();
        assert_eq!(applied_of(&rm, 0), "bb,aa");
    }

    #[test]
    fn rejected_configurations_are_skipped_silently() {
        let validator: ConfigurationValidator =
            Arc::new(|c: &Configuration| c.get("banned").is_none());

        let mut sweep = MultiConfExperiment::new()
            .with_base(Box::new(Recorder::default()))
            .with_validator(validator)
            .with_configuration(Configuration::new().with("x", 1.0))
            .with_configuration(Configuration::new().with("banned", 1.0))
            .with_configuration(Configuration::new().with("y", 2.0));

        let rm = sweep.run().unwrap();
        assert_eq!(rm.num("numConfs"), Some(2.0));
        assert_eq!(rm.num("numRuns"), Some(2.0));
        assert_eq!(rm.num("abortCount"), Some(0.0));
    }

    #[test]
    fn missing_base_without_templates_is_fatal() {
        let mut sweep =
            MultiConfExperiment::new().with_configuration(Configuration::new().with("x", 1.0));
        assert!(matches!(
            sweep.run(),
            Err(SimError::Configuration(_))
        ));
    }

    #[test]
    fn template_key_supplies_the_clone_source() {
        let mut alt = Recorder::default();
        alt.applied.push("I-am-alt".to_string());

        let conf = Configuration::new()
            .with("x", 1.0)
            .with(KEY_EXPERIMENT, FactorValue::Experiment(Box::new(alt)));

        let mut sweep = MultiConfExperiment::new()
            .with_base(Box::new(Recorder::default()))
            .with_configuration(Configuration::new().with("x", 1.0))
            .with_configuration(conf);

        let rm = sweep.run().unwrap();
        assert_eq!(applied_of(&rm, 0), "x");
        assert_eq!(applied_of(&rm, 1), "I-am-alt,x");
    }

    #[test]
    fn failing_configuration_is_trapped_not_fatal() {
        let mut failing = Recorder::default();
        failing.fail_on = Some("boom".to_string());

        let mut sweep = MultiConfExperiment::new()
            .with_base(Box::new(failing))
            .with_configuration(Configuration::new().with("ok", 1.0))
            .with_configuration(Configuration::new().with("boom", 1.0))
            .with_configuration(Configuration::new().with("ok", 2.0));

        let rm = sweep.run().unwrap();
        assert_eq!(rm.num("abortCount"), Some(1.0));

        let runs = match rm.get("runs") {
            Some(ResultValue::Map(m)) => m,
            _ => unreachable!(),
        };
        let failed = match runs.get("conf1") {
            Some(ResultValue::Map(m)) => m,
            other => panic!("missing failed run: {other:?}"),
        };
        assert!(failed.contains_key("EXCEPTION"));
        assert!(failed.contains_key("EXCEPTION_MESSAGE"));
        assert_eq!(failed.num("abortCount"), Some(1.0));
    }

    #[test]
    fn complex_setter_configures_procedurally() {
        let setter: crate::experiment::ComplexFactorSetter = Arc::new(|exp| {
            let recorder = exp
                .as_any_mut()
                .downcast_mut::<Recorder>()
                .expect("setter used with the wrong experiment type");
            recorder.applied.push("via-setter".to_string());
            Ok(())
        });

        let conf = Configuration::new().with("zzzz", 1.0).with(
            "zz",
            FactorValue::Setter(setter),
        );
        let mut sweep = MultiConfExperiment::new()
            .with_base(Box::new(Recorder::default()))
            .with_configuration(conf);

        let rm = sweep.run().unwrap();
        // the setter's shorter key applies first
        assert_eq!(applied_of(&rm, 0), "via-setter,zzzz");
    }

    #[test]
    fn replications_aggregate_per_signature() {
        let mut sweep = MultiConfExperiment::new()
            .with_base(Box::new(Recorder::default()))
            .with_replications(3)
            .with_configuration(Configuration::new().with("x", 1.0));

        let rm = sweep.run().unwrap();
        assert_eq!(rm.num("numRuns"), Some(3.0));

        let aggregates = match rm.get("aggregates") {
            Some(ResultValue::Map(m)) => m,
            _ => unreachable!(),
        };
        let (sig, columns) = aggregates.iter().next().expect("one signature");
        assert_eq!(sig, "x=1");
        match columns {
            ResultValue::Map(cols) => match cols.get("numApplied") {
                Some(ResultValue::Map(summary)) => {
                    assert_eq!(summary.num("count"), Some(3.0));
                    assert_eq!(summary.num("mean"), Some(1.0));
                }
                other => panic!("missing summary: {other:?}"),
            },
            _ => unreachable!(),
        }
    }
}
