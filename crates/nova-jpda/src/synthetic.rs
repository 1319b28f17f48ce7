use nova_jdi::{Location, StepDepth};

/// How to get past compiler-generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticStep {
    /// Step with this depth.
    Depth(StepDepth),
    /// Synthetic, no preferred depth: the caller picks one.
    Default,
}

impl SyntheticStep {
    pub fn depth_or(self, default: StepDepth) -> StepDepth {
        match self {
            SyntheticStep::Depth(depth) => depth,
            SyntheticStep::Default => default,
        }
    }
}

/// Classifies `location` as compiler-generated, or `None` for user code.
///
/// `lambda$` bodies are user code, except at line 1 where the lambda is being
/// initialized; those are stepped over.
pub fn synthetic_step(location: &Location) -> Option<SyntheticStep> {
    let method = &location.method;
    if method.name.starts_with("lambda$") {
        return (location.line == 1).then_some(SyntheticStep::Depth(StepDepth::Over));
    }
    if method.declaring_type.contains("$$Lambda$") || method.is_synthetic {
        return Some(SyntheticStep::Default);
    }
    None
}

const BOX_TYPES: &[&str] = &[
    "java.lang.Boolean",
    "java.lang.Byte",
    "java.lang.Character",
    "java.lang.Short",
    "java.lang.Integer",
    "java.lang.Long",
    "java.lang.Float",
    "java.lang.Double",
];

const BOX_METHODS: &[&str] = &[
    "booleanValue",
    "byteValue",
    "charValue",
    "shortValue",
    "intValue",
    "longValue",
    "floatValue",
    "doubleValue",
    "valueOf",
];

/// Autoboxing / unboxing helpers such as `Integer.valueOf`.
pub fn is_boxing_helper(location: &Location) -> bool {
    BOX_TYPES.contains(&location.declaring_type()) && BOX_METHODS.contains(&location.method_name())
}
