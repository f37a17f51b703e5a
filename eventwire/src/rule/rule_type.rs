//! Structural runtime type checking.
//!
//! A [`RuleType`] describes the set of [`Value`]s one payload field may
//! take. Instances are opaque and immutable: they are built through named
//! factories, and the combinators [`RuleType::merge`] /
//! [`RuleType::intersect`] always return a new instance.
//!
//! # Numeric classification
//!
//! A number is classified into exactly one of five sub-kinds: safe integer
//! (excluding `-0`), other finite, `+∞`, `-∞`, `NaN`. Each sub-kind is
//! gated independently, and the min/max bounds apply only to the two
//! finite branches. `-0` deliberately lands in the non-integer finite
//! branch.

use indexmap::IndexMap;
use std::collections::HashSet;
use std::fmt;

use crate::error::RuleDefinitionError;
use crate::value::Value;

/// Largest integer magnitude exactly representable in an f64.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Which built-in container kind a container rule accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// Keyed container ([`Value::Map`]).
    Map,
    /// Membership container ([`Value::Set`]).
    Set,
    /// Byte array ([`Value::Bytes`]).
    Bytes,
    /// Raw buffer ([`Value::Buffer`]).
    Buffer,
}

impl ContainerKind {
    fn name(self) -> &'static str {
        match self {
            ContainerKind::Map => "Map",
            ContainerKind::Set => "Set",
            ContainerKind::Bytes => "Bytes",
            ContainerKind::Buffer => "Buffer",
        }
    }
}

/// Immutable structural type descriptor and verifier.
#[derive(Debug, Clone, Default)]
pub struct RuleType {
    /// Accept everything, skipping all other checks.
    any: bool,

    number: bool,
    allow_integer: bool,
    allow_finite: bool,
    allow_positive_infinity: bool,
    allow_negative_infinity: bool,
    allow_nan: bool,
    number_min: Option<f64>,
    number_max: Option<f64>,

    boolean: bool,

    string: bool,
    string_min_length: Option<usize>,
    string_max_length: Option<usize>,

    bigint: bool,

    array: bool,
    /// Positional rules for the first N elements.
    array_rules: Vec<RuleType>,
    /// Rule for elements beyond the positional ones; `None` rejects them.
    array_rest: Option<Box<RuleType>>,
    array_min_length: Option<usize>,
    array_max_length: Option<usize>,

    object: bool,
    required_keys: HashSet<String>,
    key_rules: IndexMap<String, RuleType>,
    /// Rule for keys without a per-key rule; `None` rejects unknown keys.
    rest_value: Option<Box<RuleType>>,

    container: Option<ContainerKind>,
    container_key: Option<Box<RuleType>>,
    container_value: Option<Box<RuleType>>,

    allow_null: bool,
    allow_undefined: bool,

    /// Values always accepted, checked before shape dispatch.
    enum_values: Option<Vec<Value>>,
}

fn is_safe_integer(n: f64) -> bool {
    n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER
}

impl RuleType {
    /// Verify a value against this rule. Total: always returns a boolean,
    /// never panics.
    pub fn verify(&self, value: &Value) -> bool {
        if self.any {
            return true;
        }
        if let Some(values) = &self.enum_values {
            if values.iter().any(|v| v.same_value_zero(value)) {
                return true;
            }
        }
        match value {
            Value::Num(n) => self.verify_number(*n),
            Value::Bool(_) => self.boolean,
            Value::Str(s) => self.verify_string(s),
            Value::BigInt(_) => self.bigint,
            Value::Null => self.allow_null,
            Value::Undefined => self.allow_undefined,
            Value::Array(items) => self.verify_array(items),
            Value::Object(map) => self.verify_object(map),
            Value::Bytes(_) => self.container == Some(ContainerKind::Bytes),
            Value::Buffer(_) => self.container == Some(ContainerKind::Buffer),
            Value::Map(entries) => self.verify_map(entries),
            Value::Set(items) => self.verify_set(items),
        }
    }

    fn verify_number(&self, n: f64) -> bool {
        if !self.number {
            return false;
        }
        if is_safe_integer(n) && !(n == 0.0 && n.is_sign_negative()) {
            if !self.allow_integer {
                return false;
            }
        } else if n.is_finite() {
            if !self.allow_finite {
                return false;
            }
        } else if n == f64::INFINITY {
            return self.allow_positive_infinity;
        } else if n == f64::NEG_INFINITY {
            return self.allow_negative_infinity;
        } else {
            return self.allow_nan;
        }
        // Bounds only reach the two finite branches.
        if let Some(max) = self.number_max {
            if max < n {
                return false;
            }
        }
        if let Some(min) = self.number_min {
            if min > n {
                return false;
            }
        }
        true
    }

    fn verify_string(&self, s: &str) -> bool {
        if !self.string {
            return false;
        }
        let len = s.chars().count();
        if let Some(min) = self.string_min_length {
            if len < min {
                return false;
            }
        }
        if let Some(max) = self.string_max_length {
            if len > max {
                return false;
            }
        }
        true
    }

    fn verify_array(&self, items: &[Value]) -> bool {
        if !self.array {
            return false;
        }
        if let Some(min) = self.array_min_length {
            if items.len() < min {
                return false;
            }
        }
        if let Some(max) = self.array_max_length {
            if items.len() > max {
                return false;
            }
        }
        for (index, rule) in self.array_rules.iter().enumerate() {
            let item = items.get(index).unwrap_or(&crate::value::UNDEFINED);
            if !rule.verify(item) {
                return false;
            }
        }
        if items.len() > self.array_rules.len() {
            match &self.array_rest {
                None => return false,
                Some(rest) => {
                    if !rest.any {
                        for item in &items[self.array_rules.len()..] {
                            if !rest.verify(item) {
                                return false;
                            }
                        }
                    }
                }
            }
        }
        true
    }

    fn verify_object(&self, map: &IndexMap<String, Value>) -> bool {
        if !self.object {
            return false;
        }
        if self.required_keys.is_empty()
            && self.key_rules.is_empty()
            && self.rest_value.as_ref().is_some_and(|r| r.any)
        {
            return true;
        }
        for key in &self.required_keys {
            if !map.contains_key(key) {
                return false;
            }
        }
        for (key, value) in map {
            match self.key_rules.get(key) {
                Some(rule) => {
                    if !rule.verify(value) {
                        return false;
                    }
                }
                None => match &self.rest_value {
                    Some(rest) => {
                        if !rest.verify(value) {
                            return false;
                        }
                    }
                    None => return false,
                },
            }
        }
        true
    }

    fn verify_map(&self, entries: &[(Value, Value)]) -> bool {
        if self.container != Some(ContainerKind::Map) {
            return false;
        }
        let (Some(key_rule), Some(value_rule)) = (&self.container_key, &self.container_value)
        else {
            return false;
        };
        if key_rule.any && value_rule.any {
            return true;
        }
        entries
            .iter()
            .all(|(k, v)| key_rule.verify(k) && value_rule.verify(v))
    }

    fn verify_set(&self, items: &[Value]) -> bool {
        if self.container != Some(ContainerKind::Set) {
            return false;
        }
        let Some(value_rule) = &self.container_value else {
            return false;
        };
        if value_rule.any {
            return true;
        }
        items.iter().all(|v| value_rule.verify(v))
    }

    /// Merge two rules into the loosest rule accepting anything either
    /// accepts. Intended for combining rules over *different* base shapes
    /// (an optional string field is `string().merge(&undefined())`).
    ///
    /// `any` on either side dominates. Shape flags are OR'd. Sub-parameters
    /// follow a same-or-absent rule: when only one side restricts a shape
    /// its parameters carry over, when both restrict they must be
    /// identical. Two sides that both restrict the same structural shape
    /// (array, object, container) cannot be merged losslessly.
    ///
    /// # Errors
    ///
    /// [`RuleDefinitionError::StructuralCombine`] and
    /// [`RuleDefinitionError::ConstraintConflict`] on the clashes above.
    pub fn merge(&self, other: &RuleType) -> Result<RuleType, RuleDefinitionError> {
        if self.any || other.any {
            return Ok(RuleType::any());
        }
        let mut ret = RuleType::default();

        ret.number = self.number || other.number;
        if ret.number {
            ret.allow_integer = self.allow_integer || other.allow_integer;
            ret.allow_finite = self.allow_finite || other.allow_finite;
            ret.allow_positive_infinity =
                self.allow_positive_infinity || other.allow_positive_infinity;
            ret.allow_negative_infinity =
                self.allow_negative_infinity || other.allow_negative_infinity;
            ret.allow_nan = self.allow_nan || other.allow_nan;
            ret.number_min = merge_same(
                self.number,
                other.number,
                self.number_min,
                other.number_min,
                "number bound",
            )?;
            ret.number_max = merge_same(
                self.number,
                other.number,
                self.number_max,
                other.number_max,
                "number bound",
            )?;
        }

        ret.boolean = self.boolean || other.boolean;

        ret.string = self.string || other.string;
        if ret.string {
            ret.string_min_length = merge_same(
                self.string,
                other.string,
                self.string_min_length,
                other.string_min_length,
                "string length",
            )?;
            ret.string_max_length = merge_same(
                self.string,
                other.string,
                self.string_max_length,
                other.string_max_length,
                "string length",
            )?;
        }

        ret.bigint = self.bigint || other.bigint;

        ret.array = self.array || other.array;
        if ret.array {
            if self.array && other.array {
                return Err(RuleDefinitionError::StructuralCombine { shape: "array" });
            }
            let side = if self.array { self } else { other };
            ret.array_rules = side.array_rules.clone();
            ret.array_rest = side.array_rest.clone();
            ret.array_min_length = side.array_min_length;
            ret.array_max_length = side.array_max_length;
        }

        ret.object = self.object || other.object;
        if ret.object {
            if self.object && other.object {
                return Err(RuleDefinitionError::StructuralCombine { shape: "object" });
            }
            let side = if self.object { self } else { other };
            ret.required_keys = side.required_keys.clone();
            ret.key_rules = side.key_rules.clone();
            ret.rest_value = side.rest_value.clone();
        }

        if self.container.is_some() && other.container.is_some() {
            return Err(RuleDefinitionError::StructuralCombine { shape: "container" });
        }
        if self.container.is_some() || other.container.is_some() {
            let side = if self.container.is_some() { self } else { other };
            ret.container = side.container;
            ret.container_key = side.container_key.clone();
            ret.container_value = side.container_value.clone();
        }

        ret.allow_null = self.allow_null || other.allow_null;
        ret.allow_undefined = self.allow_undefined || other.allow_undefined;

        if self.enum_values.is_some() || other.enum_values.is_some() {
            let mut values: Vec<Value> = self.enum_values.clone().unwrap_or_default();
            for value in other.enum_values.iter().flatten() {
                if !values.iter().any(|v| v.same_value_zero(value)) {
                    values.push(value.clone());
                }
            }
            if !values.is_empty() {
                ret.enum_values = Some(values);
            }
        }

        Ok(ret)
    }

    /// Intersect two rules over scalar constraints.
    ///
    /// Legacy combinator retained for completeness; the rest of the crate
    /// never relies on it and `merge` is the preferred way to combine
    /// rules. Fails when both sides restrict the same structural shape.
    ///
    /// # Errors
    ///
    /// [`RuleDefinitionError::StructuralCombine`] and
    /// [`RuleDefinitionError::ConstraintConflict`].
    pub fn intersect(&self, other: &RuleType) -> Result<RuleType, RuleDefinitionError> {
        if self.any {
            return Ok(other.clone());
        }
        if other.any {
            return Ok(self.clone());
        }
        let mut ret = RuleType::default();

        ret.number = self.number && other.number;
        if ret.number {
            ret.allow_integer = self.allow_integer && other.allow_integer;
            ret.allow_finite = self.allow_finite && other.allow_finite;
            ret.allow_positive_infinity =
                self.allow_positive_infinity && other.allow_positive_infinity;
            ret.allow_negative_infinity =
                self.allow_negative_infinity && other.allow_negative_infinity;
            ret.allow_nan = self.allow_nan && other.allow_nan;
            ret.number_min = intersect_same(self.number_min, other.number_min, "number bound")?;
            ret.number_max = intersect_same(self.number_max, other.number_max, "number bound")?;
        }

        ret.boolean = self.boolean && other.boolean;

        ret.string = self.string && other.string;
        if ret.string {
            ret.string_min_length = intersect_same(
                self.string_min_length,
                other.string_min_length,
                "string length",
            )?;
            ret.string_max_length = intersect_same(
                self.string_max_length,
                other.string_max_length,
                "string length",
            )?;
        }

        ret.bigint = self.bigint && other.bigint;

        if self.array && other.array {
            return Err(RuleDefinitionError::StructuralCombine { shape: "array" });
        }
        if self.object && other.object {
            return Err(RuleDefinitionError::StructuralCombine { shape: "object" });
        }
        if self.container.is_some() && other.container.is_some() {
            return Err(RuleDefinitionError::StructuralCombine { shape: "container" });
        }

        ret.allow_null = self.allow_null && other.allow_null;
        ret.allow_undefined = self.allow_undefined && other.allow_undefined;

        if self.enum_values.is_some() || other.enum_values.is_some() {
            let mut values: Vec<Value> = Vec::new();
            for value in self.enum_values.iter().flatten() {
                if other.verify(value) && !values.iter().any(|v| v.same_value_zero(value)) {
                    values.push(value.clone());
                }
            }
            for value in other.enum_values.iter().flatten() {
                if self.verify(value) && !values.iter().any(|v| v.same_value_zero(value)) {
                    values.push(value.clone());
                }
            }
            if !values.is_empty() {
                ret.enum_values = Some(values);
            }
        }

        Ok(ret)
    }

    /// Rule accepting no value at all.
    pub fn never() -> RuleType {
        RuleType::default()
    }

    /// Rule accepting any value.
    pub fn any() -> RuleType {
        RuleType {
            any: true,
            ..RuleType::default()
        }
    }

    /// Rule always accepting the listed values; anything else falls
    /// through to the other shape checks (all disabled here).
    pub fn enum_of<I: IntoIterator<Item = Value>>(values: I) -> RuleType {
        RuleType {
            enum_values: Some(values.into_iter().collect()),
            ..RuleType::default()
        }
    }

    /// Rule accepting every number sub-kind.
    pub fn number() -> RuleType {
        RuleType {
            number: true,
            allow_integer: true,
            allow_finite: true,
            allow_positive_infinity: true,
            allow_negative_infinity: true,
            allow_nan: true,
            ..RuleType::default()
        }
    }

    /// Rule accepting safe integers only.
    pub fn integer() -> RuleType {
        RuleType {
            number: true,
            allow_integer: true,
            ..RuleType::default()
        }
    }

    /// Rule accepting safe integers within the given bounds.
    ///
    /// # Errors
    ///
    /// [`RuleDefinitionError::NanBound`] when a bound is NaN.
    pub fn integer_range(
        min: impl Into<Option<f64>>,
        max: impl Into<Option<f64>>,
    ) -> Result<RuleType, RuleDefinitionError> {
        let (min, max) = check_bounds(min.into(), max.into())?;
        Ok(RuleType {
            number_min: min,
            number_max: max,
            ..RuleType::integer()
        })
    }

    /// Rule accepting safe integers at or above zero.
    pub fn nonnegative_integer() -> RuleType {
        RuleType {
            number_min: Some(0.0),
            ..RuleType::integer()
        }
    }

    /// Rule accepting any finite number.
    pub fn finite() -> RuleType {
        RuleType {
            number: true,
            allow_integer: true,
            allow_finite: true,
            ..RuleType::default()
        }
    }

    /// Rule accepting finite numbers within the given bounds.
    ///
    /// # Errors
    ///
    /// [`RuleDefinitionError::NanBound`] when a bound is NaN.
    pub fn finite_range(
        min: impl Into<Option<f64>>,
        max: impl Into<Option<f64>>,
    ) -> Result<RuleType, RuleDefinitionError> {
        let (min, max) = check_bounds(min.into(), max.into())?;
        Ok(RuleType {
            number_min: min,
            number_max: max,
            ..RuleType::finite()
        })
    }

    /// Rule accepting any string.
    pub fn string() -> RuleType {
        RuleType {
            string: true,
            ..RuleType::default()
        }
    }

    /// Rule accepting strings whose length is within the given bounds.
    pub fn string_with_length(
        min: impl Into<Option<usize>>,
        max: impl Into<Option<usize>>,
    ) -> RuleType {
        RuleType {
            string_min_length: min.into(),
            string_max_length: max.into(),
            ..RuleType::string()
        }
    }

    /// Rule accepting booleans.
    pub fn boolean() -> RuleType {
        RuleType {
            boolean: true,
            ..RuleType::default()
        }
    }

    /// Rule accepting big integers.
    pub fn bigint() -> RuleType {
        RuleType {
            bigint: true,
            ..RuleType::default()
        }
    }

    /// Rule accepting null.
    pub fn null() -> RuleType {
        RuleType {
            allow_null: true,
            ..RuleType::default()
        }
    }

    /// Rule accepting the absent value.
    pub fn undefined() -> RuleType {
        RuleType {
            allow_undefined: true,
            ..RuleType::default()
        }
    }

    /// Object rule with required keys only; unknown keys are rejected.
    ///
    /// # Errors
    ///
    /// [`RuleDefinitionError::DuplicateKey`] on a repeated key.
    pub fn object(required: Vec<(&str, RuleType)>) -> Result<RuleType, RuleDefinitionError> {
        RuleType::object_with(required, Vec::new(), None)
    }

    /// Object rule with required keys, optional keys and an optional
    /// rest-value rule for keys not named in either list.
    ///
    /// # Errors
    ///
    /// [`RuleDefinitionError::DuplicateKey`] when a key appears in both
    /// lists or twice in one list.
    pub fn object_with(
        required: Vec<(&str, RuleType)>,
        optional: Vec<(&str, RuleType)>,
        rest_value: Option<RuleType>,
    ) -> Result<RuleType, RuleDefinitionError> {
        let mut ret = RuleType {
            object: true,
            rest_value: rest_value.map(Box::new),
            ..RuleType::default()
        };
        for (key, rule) in required {
            if ret.key_rules.insert(key.to_string(), rule).is_some() {
                return Err(RuleDefinitionError::DuplicateKey {
                    key: key.to_string(),
                });
            }
            ret.required_keys.insert(key.to_string());
        }
        for (key, rule) in optional {
            if ret.key_rules.insert(key.to_string(), rule).is_some() {
                return Err(RuleDefinitionError::DuplicateKey {
                    key: key.to_string(),
                });
            }
        }
        Ok(ret)
    }

    /// Array rule with positional element rules and an optional rest rule
    /// for elements past them; without a rest rule, extra elements are
    /// rejected.
    pub fn array(positional: Vec<RuleType>, rest: Option<RuleType>) -> RuleType {
        RuleType {
            array: true,
            array_rules: positional,
            array_rest: rest.map(Box::new),
            ..RuleType::default()
        }
    }

    /// Array rule with length bounds on top of [`RuleType::array`].
    pub fn array_with_length(
        positional: Vec<RuleType>,
        rest: Option<RuleType>,
        min: impl Into<Option<usize>>,
        max: impl Into<Option<usize>>,
    ) -> RuleType {
        RuleType {
            array_min_length: min.into(),
            array_max_length: max.into(),
            ..RuleType::array(positional, rest)
        }
    }

    /// Keyed-container rule; every entry's key and value must satisfy the
    /// given rules.
    pub fn class_map(key_rule: RuleType, value_rule: RuleType) -> RuleType {
        RuleType {
            container: Some(ContainerKind::Map),
            container_key: Some(Box::new(key_rule)),
            container_value: Some(Box::new(value_rule)),
            ..RuleType::default()
        }
    }

    /// Membership-container rule; every member must satisfy the rule.
    pub fn class_set(value_rule: RuleType) -> RuleType {
        RuleType {
            container: Some(ContainerKind::Set),
            container_value: Some(Box::new(value_rule)),
            ..RuleType::default()
        }
    }

    /// Byte-array rule. Content passes unconditionally once the kind
    /// matches.
    pub fn class_bytes() -> RuleType {
        RuleType {
            container: Some(ContainerKind::Bytes),
            ..RuleType::default()
        }
    }

    /// Raw-buffer rule. Content passes unconditionally once the kind
    /// matches.
    pub fn class_buffer() -> RuleType {
        RuleType {
            container: Some(ContainerKind::Buffer),
            ..RuleType::default()
        }
    }
}

impl fmt::Display for RuleType {
    /// Renders the accepted-shape union, e.g. `number | string | null`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.any {
            return write!(f, "any");
        }
        let mut shapes: Vec<&str> = Vec::new();
        if self.number {
            shapes.push("number");
        }
        if self.boolean {
            shapes.push("boolean");
        }
        if self.string {
            shapes.push("string");
        }
        if self.bigint {
            shapes.push("bigint");
        }
        if self.array {
            shapes.push("Array");
        }
        if self.object {
            shapes.push("Object");
        }
        if let Some(kind) = self.container {
            shapes.push(kind.name());
        }
        if self.allow_null {
            shapes.push("null");
        }
        if self.allow_undefined {
            shapes.push("undefined");
        }
        if shapes.is_empty() {
            write!(f, "never")
        } else {
            write!(f, "{}", shapes.join(" | "))
        }
    }
}

fn check_bounds(
    min: Option<f64>,
    max: Option<f64>,
) -> Result<(Option<f64>, Option<f64>), RuleDefinitionError> {
    if min.is_some_and(f64::is_nan) || max.is_some_and(f64::is_nan) {
        return Err(RuleDefinitionError::NanBound);
    }
    Ok((min, max))
}

/// Same-or-absent merge of one sub-parameter. A side that does not
/// restrict the parent shape contributes nothing; when both sides
/// restrict it, an absent value loosens the result and differing values
/// conflict.
fn merge_same<T: PartialEq + Copy>(
    a_on: bool,
    b_on: bool,
    a: Option<T>,
    b: Option<T>,
    what: &'static str,
) -> Result<Option<T>, RuleDefinitionError> {
    if !a_on {
        return Ok(b);
    }
    if !b_on {
        return Ok(a);
    }
    match (a, b) {
        (Some(x), Some(y)) if x == y => Ok(Some(x)),
        (Some(_), Some(_)) => Err(RuleDefinitionError::ConstraintConflict { what }),
        _ => Ok(None),
    }
}

/// Non-null intersection of one sub-parameter: take the restricting side,
/// conflict when both restrict differently.
fn intersect_same<T: PartialEq + Copy>(
    a: Option<T>,
    b: Option<T>,
    what: &'static str,
) -> Result<Option<T>, RuleDefinitionError> {
    match (a, b) {
        (Some(x), Some(y)) if x == y => Ok(Some(x)),
        (Some(_), Some(_)) => Err(RuleDefinitionError::ConstraintConflict { what }),
        (Some(x), None) => Ok(Some(x)),
        (None, y) => Ok(y),
    }
}
