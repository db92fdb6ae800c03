use std::sync::Arc;

use tracing::debug;

use super::weights::*;
use crate::registry::{Candidate, Registry};
use crate::types::{names, NativeType, Primitive, Value};

/// Outcome of overload selection.
#[derive(Debug)]
pub struct Selection<C> {
    pub selected: Arc<C>,
    pub distance: u32,
    /// Earlier candidate with the same distance, when the choice depended
    /// on discovery order.
    pub tied_with: Option<Arc<C>>,
}

/// Ranks overload candidates against runtime arguments.
#[derive(Clone, Copy)]
pub struct Resolver<'a> {
    registry: &'a Registry,
}

impl<'a> Resolver<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Pick the best of `candidates`, which must all accept `args.len()`
    /// arguments.
    ///
    /// A single candidate is returned without scoring. Otherwise the lowest
    /// total distance wins, a zero distance ends the scan, and on a tie the
    /// candidate seen first is kept.
    pub fn select<C: Candidate>(&self, candidates: &[Arc<C>], args: &[Value]) -> Option<Selection<C>> {
        if let [only] = candidates {
            return Some(Selection {
                selected: only.clone(),
                distance: 0,
                tied_with: None,
            });
        }

        let mut best: Option<(Arc<C>, u32)> = None;
        let mut similar: Option<Arc<C>> = None;
        for candidate in candidates {
            let distance = self.distance(candidate.params(), args);
            if distance == 0 {
                return Some(Selection {
                    selected: candidate.clone(),
                    distance,
                    tied_with: None,
                });
            }
            match &best {
                Some((_, d)) if distance > *d => {}
                Some((_, d)) if distance == *d => similar = Some(candidate.clone()),
                _ => {
                    best = Some((candidate.clone(), distance));
                    similar = None;
                }
            }
        }

        let (selected, distance) = best?;
        if let Some(other) = &similar {
            let described: Vec<String> = args.iter().map(Value::describe).collect();
            debug!(
                "Portability warning: {} and {} both match ({}). Use an explicit cast to select one.",
                selected.signature(),
                other.signature(),
                described.join(", ")
            );
        }
        Some(Selection {
            selected,
            distance,
            tied_with: similar,
        })
    }

    /// Total distance of `args` from `params`. Null arguments cost nothing.
    pub fn distance(&self, params: &[NativeType], args: &[Value]) -> u32 {
        params
            .iter()
            .zip(args)
            .map(|(param, arg)| match arg.runtime_type() {
                None => 0,
                Some(arg_type) => self.weight(param, &arg_type, Some(arg)),
            })
            .fold(0u32, u32::saturating_add)
    }

    /// Distance of one argument of type `arg` from `param`. `value` is
    /// consulted for composites, whose element type decides the cost.
    pub fn weight(&self, param: &NativeType, arg: &NativeType, value: Option<&Value>) -> u32 {
        let registry = self.registry;
        if registry.is_assignable(param, arg) {
            let mut weight = 0;
            let mut current = registry.superclass_of(arg);
            while let Some(sup) = current {
                if !registry.is_assignable(param, &sup) {
                    break;
                }
                weight += COVARIANT_STEP;
                current = registry.superclass_of(&sup);
            }
            return weight;
        }

        if param.is_class(names::STRING) {
            return if is_text(arg) {
                0
            } else if *arg == NativeType::array_of(NativeType::BYTE) {
                TEXT_FROM_BYTES
            } else {
                TEXT_FALLBACK
            };
        }

        if let Some(component) = param.component() {
            if arg.is_class(names::PEER_STRING) {
                return if *component == NativeType::BYTE {
                    BYTES_FROM_TEXT
                } else {
                    MISMATCH
                };
            }
            if arg.is_class(names::PEER_ARRAY) {
                let first = match value {
                    Some(Value::Composite(c)) => c.first_value().and_then(Value::runtime_type),
                    _ => None,
                };
                return match first {
                    Some(elem) => self.component_weight(component, &elem),
                    None => 0,
                };
            }
            if let Some(elem) = arg.component() {
                return self.component_weight(component, elem);
            }
            return MISMATCH;
        }

        if let Some(class) = param.class_name() {
            if registry.is_subclass(class, names::COLLECTION) {
                let map_like = registry.is_assignable(&NativeType::class(names::MAP), arg);
                return if map_like { COLLECTION_FROM_MAP } else { MISMATCH };
            }
        }

        if let Some(p) = param.as_primitive() {
            return primitive_weight(registry, p, arg);
        }

        if let Some(class) = param.class_name() {
            if registry.is_subclass(class, names::NUMBER) {
                let wants_inexact = class == names::FLOAT || class == names::DOUBLE;
                let matches = if wants_inexact {
                    arg.is_class(names::DOUBLE)
                } else {
                    arg.is_class(names::EXACT_NUMBER)
                };
                return if matches { 0 } else { MISMATCH };
            }
        }

        MISMATCH
    }

    fn component_weight(&self, component: &NativeType, elem: &NativeType) -> u32 {
        if component == elem {
            return 0;
        }
        let bias = if *component == NativeType::object() {
            ANY_COMPONENT
        } else {
            SPECIFIC_COMPONENT
        };
        bias.saturating_add(self.weight(component, elem, None))
    }
}

fn is_text(ty: &NativeType) -> bool {
    ty.is_class(names::STRING) || ty.is_class(names::PEER_STRING)
}

fn primitive_weight(registry: &Registry, param: Primitive, arg: &NativeType) -> u32 {
    if arg.is_class(names::DOUBLE) {
        return match param {
            Primitive::Float => 1,
            Primitive::Double => 0,
            _ => NUMERIC_MISMATCH,
        };
    }
    let numeric = arg
        .class_name()
        .map(|class| registry.is_subclass(class, names::NUMBER))
        .unwrap_or(false);
    if numeric {
        return match param {
            Primitive::Boolean => 5,
            Primitive::Char => 4,
            Primitive::Byte => 3,
            Primitive::Short => 2,
            Primitive::Int => 1,
            Primitive::Long => 0,
            _ => NUMERIC_MISMATCH,
        };
    }
    if arg.is_class(names::BOOLEAN) {
        return if param == Primitive::Boolean { 0 } else { MISMATCH };
    }
    if arg.is_class(names::CHARACTER) {
        return if param == Primitive::Char { 0 } else { MISMATCH };
    }
    if is_text(arg) {
        return PRIMITIVE_FROM_TEXT;
    }
    MISMATCH
}
