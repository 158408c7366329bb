//! StatsD line encoding.
//!
//! Every function in this module is pure: the same inputs always produce byte-identical lines, and nothing here
//! touches the network. The transport only ever sees the resulting [`EncodedLine`]s.

use std::{borrow::Cow, fmt, str::FromStr as _};

use bigdecimal::{BigDecimal, RoundingMode};
use num_bigint::{BigInt, BigUint, Sign};
use thiserror::Error;

/// Decimal places used for every floating-point or decimal value on the wire.
const FRACTIONAL_DIGITS: u32 = 2;

/// Largest number of integer digits a decimal may render to: the largest UDP payload over IPv4.
const MAX_INTEGER_DIGITS: i128 = 65_507;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MetricType {
    Counter,
    Gauge,
    Timing,
}

impl MetricType {
    fn as_str(self) -> &'static str {
        match self {
            MetricType::Counter => "|c",
            MetricType::Gauge => "|g",
            MetricType::Timing => "|ms",
        }
    }
}

/// A sample rate was outside of the `[0, 1]` range.
#[derive(Clone, Copy, Debug, Error, PartialEq)]
#[error("sample rate must be within [0, 1], got {0}")]
pub struct InvalidSampleRate(pub f64);

/// The fraction of events that a counter delta represents.
///
/// Sample rates are validated on construction, so a `SampleRate` is always within `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct SampleRate(f64);

impl SampleRate {
    /// A sample rate of 1.0, which is never written to the wire as it is the implied default.
    pub const ONE: SampleRate = SampleRate(1.0);

    /// Creates a new `SampleRate`.
    ///
    /// # Errors
    ///
    /// If `rate` is not within `[0, 1]`, or is NaN, an error is returned.
    pub fn new(rate: f64) -> Result<Self, InvalidSampleRate> {
        if (0.0..=1.0).contains(&rate) {
            Ok(SampleRate(rate))
        } else {
            Err(InvalidSampleRate(rate))
        }
    }

    /// Returns the sample rate as a float.
    pub const fn get(self) -> f64 {
        self.0
    }

    fn is_implied(self) -> bool {
        (self.0 - 1.0).abs() < f64::EPSILON
    }
}

impl TryFrom<f64> for SampleRate {
    type Error = InvalidSampleRate;

    fn try_from(rate: f64) -> Result<Self, Self::Error> {
        SampleRate::new(rate)
    }
}

/// A value that can be reported as a gauge.
///
/// Gauges in an application can hold almost anything, so this covers every value type that has a sensible
/// representation in the StatsD protocol. Anything else is [`NumericValue::Unsupported`] and is skipped when reporting.
#[derive(Clone, Debug, PartialEq)]
pub enum NumericValue {
    /// A signed integer, rendered as plain decimal digits.
    Integer(i64),

    /// An arbitrarily large unsigned integer, rendered as plain decimal digits.
    Unsigned(BigUint),

    /// An arbitrary-precision decimal, rendered with two fractional digits.
    Decimal(BigDecimal),

    /// A floating-point value, rendered with two fractional digits.
    ///
    /// Non-finite values cannot be rendered and are treated like [`NumericValue::Unsupported`].
    Float(f64),

    /// Free-form text, rendered sanitized.
    Text(String),

    /// A value with no StatsD representation.
    Unsupported,
}

impl NumericValue {
    /// Renders the value as it would appear on the wire.
    ///
    /// Returns `None` if the value cannot be rendered.
    pub fn render(&self) -> Option<Cow<'_, str>> {
        match self {
            NumericValue::Integer(v) => Some(Cow::Owned(itoa::Buffer::new().format(*v).to_owned())),
            NumericValue::Unsigned(v) => Some(Cow::Owned(v.to_string())),
            NumericValue::Decimal(v) => round_decimal(v).map(Cow::Owned),
            NumericValue::Float(v) => round_float(*v).map(Cow::Owned),
            NumericValue::Text(v) => Some(sanitize(v)),
            NumericValue::Unsupported => None,
        }
    }
}

macro_rules! impl_from_integer {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for NumericValue {
                fn from(value: $ty) -> Self {
                    NumericValue::Integer(i64::from(value))
                }
            }
        )*
    };
}

impl_from_integer!(i8, i16, i32, i64, u8, u16, u32);

impl From<u64> for NumericValue {
    fn from(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(v) => NumericValue::Integer(v),
            Err(_) => NumericValue::Unsigned(BigUint::from(value)),
        }
    }
}

impl From<f32> for NumericValue {
    fn from(value: f32) -> Self {
        NumericValue::Float(f64::from(value))
    }
}

impl From<f64> for NumericValue {
    fn from(value: f64) -> Self {
        NumericValue::Float(value)
    }
}

impl From<BigUint> for NumericValue {
    fn from(value: BigUint) -> Self {
        NumericValue::Unsigned(value)
    }
}

impl From<BigDecimal> for NumericValue {
    fn from(value: BigDecimal) -> Self {
        NumericValue::Decimal(value)
    }
}

impl From<String> for NumericValue {
    fn from(value: String) -> Self {
        NumericValue::Text(value)
    }
}

impl<'a> From<&'a str> for NumericValue {
    fn from(value: &'a str) -> Self {
        NumericValue::Text(value.to_owned())
    }
}

impl TryFrom<BigInt> for NumericValue {
    type Error = BigInt;

    fn try_from(value: BigInt) -> Result<Self, Self::Error> {
        if let Ok(v) = i64::try_from(&value) {
            return Ok(NumericValue::Integer(v));
        }

        match value.to_biguint() {
            Some(v) => Ok(NumericValue::Unsigned(v)),
            None => Err(value),
        }
    }
}

/// A single, complete StatsD line.
///
/// Lines never contain a newline, so any number of them can be joined into one payload.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EncodedLine(Box<str>);

impl EncodedLine {
    /// Returns the line as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the line as a byte slice.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Returns the length of the line, in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the line is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for EncodedLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<[u8]> for EncodedLine {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

/// Encodes a gauge line.
///
/// Returns `None` if the value cannot be rendered, such as [`NumericValue::Unsupported`] or a non-finite float.
pub fn encode_gauge(name: &str, value: &NumericValue, tags: &[String]) -> Option<EncodedLine> {
    let rendered = value.render()?;
    Some(encode(name, &rendered, MetricType::Gauge, None, tags))
}

/// Encodes a counter line.
///
/// The sample rate is only written when it is present and not 1.0.
pub fn encode_counter(
    name: &str,
    delta: i64,
    sample_rate: Option<SampleRate>,
    tags: &[String],
) -> EncodedLine {
    let mut int_writer = itoa::Buffer::new();
    encode(name, int_writer.format(delta), MetricType::Counter, sample_rate, tags)
}

/// Encodes a timing line, with the duration given in milliseconds.
///
/// Returns `None` if `milliseconds` is not finite.
pub fn encode_timing(name: &str, milliseconds: f64, tags: &[String]) -> Option<EncodedLine> {
    let rendered = round_float(milliseconds)?;
    Some(encode(name, &rendered, MetricType::Timing, None, tags))
}

/// Replaces every run of whitespace, and the reserved `|` delimiter, with a single `-`.
///
/// The input is borrowed as-is when there is nothing to replace.
pub fn sanitize(text: &str) -> Cow<'_, str> {
    if !text.chars().any(is_reserved) {
        return Cow::Borrowed(text);
    }

    let mut sanitized = String::with_capacity(text.len());
    let mut in_run = false;
    for c in text.chars() {
        if is_reserved(c) {
            if !in_run {
                sanitized.push('-');
                in_run = true;
            }
        } else {
            sanitized.push(c);
            in_run = false;
        }
    }

    Cow::Owned(sanitized)
}

/// Builds a dotted metric name out of an optional prefix, the metric name, and an optional facet suffix.
///
/// Empty components are skipped, so no leading, trailing, or doubled dots are produced.
pub fn metric_name(prefix: Option<&str>, name: &str, suffix: Option<&str>) -> String {
    let mut full_name = String::with_capacity(
        prefix.map_or(0, str::len) + name.len() + suffix.map_or(0, str::len) + 2,
    );

    for component in [prefix, Some(name), suffix].into_iter().flatten() {
        if component.is_empty() {
            continue;
        }

        if !full_name.is_empty() {
            full_name.push('.');
        }
        full_name.push_str(component);
    }

    full_name
}

fn is_reserved(c: char) -> bool {
    c.is_whitespace() || c == '|'
}

fn encode(
    name: &str,
    value: &str,
    metric_type: MetricType,
    sample_rate: Option<SampleRate>,
    tags: &[String],
) -> EncodedLine {
    let name = sanitize(name);
    let mut line = String::with_capacity(name.len() + value.len() + 16);

    line.push_str(&name);
    line.push(':');
    line.push_str(value);
    line.push_str(metric_type.as_str());

    if let Some(sample_rate) = sample_rate.filter(|rate| !rate.is_implied()) {
        if let Some(rate) = round_float(sample_rate.get()) {
            line.push_str("|@");
            line.push_str(&rate);
        }
    }

    write_tags(&mut line, tags);

    EncodedLine(line.into_boxed_str())
}

fn write_tags(line: &mut String, tags: &[String]) {
    for (i, tag) in tags.iter().enumerate() {
        if i == 0 {
            line.push_str("|#");
        } else {
            line.push(',');
        }
        line.push_str(&sanitize(tag));
    }
}

/// Rounds a float to two fractional digits, half-up.
///
/// The float is first rendered in its shortest round-tripping form, so a value like `1.005` rounds the way it reads
/// rather than the way it happens to be stored in binary.
fn round_float(value: f64) -> Option<String> {
    if !value.is_finite() {
        return None;
    }

    let mut float_writer = ryu::Buffer::new();
    let shortest = float_writer.format_finite(value);
    let decimal = BigDecimal::from_str(shortest).ok()?;
    round_decimal(&decimal)
}

/// Rounds a decimal to two fractional digits, half-up (away from zero on ties).
///
/// Returns `None` if the integer part has more digits than could ever fit in a single payload. The exponent of a
/// decimal is unbounded, so a value like `1e4000000000` would otherwise expand into gigabytes of digits.
fn round_decimal(value: &BigDecimal) -> Option<String> {
    let (unscaled, scale) = value.as_bigint_and_exponent();
    if unscaled.sign() == Sign::NoSign {
        return Some(zero());
    }

    // The magnitude is below `10^magnitude_exp`, and at or above `10^(magnitude_exp - 1)`.
    let digit_count = unscaled.magnitude().to_string().len();
    let magnitude_exp = digit_count as i128 - i128::from(scale);
    if magnitude_exp > MAX_INTEGER_DIGITS {
        return None;
    }

    // Anything below 0.001 rounds to zero, however many zeroes follow the point.
    if magnitude_exp < -i128::from(FRACTIONAL_DIGITS) {
        return Some(zero());
    }

    let rounded = value.with_scale_round(i64::from(FRACTIONAL_DIGITS), RoundingMode::HalfUp);
    let (digits, _) = rounded.as_bigint_and_exponent();

    let mut rendered = digits.magnitude().to_string();
    let min_len = FRACTIONAL_DIGITS as usize + 1;
    if rendered.len() < min_len {
        rendered.insert_str(0, &"0".repeat(min_len - rendered.len()));
    }
    rendered.insert(rendered.len() - FRACTIONAL_DIGITS as usize, '.');

    if digits.sign() == Sign::Minus {
        rendered.insert(0, '-');
    }

    Some(rendered)
}

fn zero() -> String {
    format!("0.{:0width$}", 0, width = FRACTIONAL_DIGITS as usize)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr as _;

    use bigdecimal::BigDecimal;
    use num_bigint::BigUint;

    use super::{
        encode_counter, encode_gauge, encode_timing, metric_name, sanitize, EncodedLine, NumericValue,
        SampleRate,
    };

    fn tags(tags: &[&str]) -> Vec<String> {
        tags.iter().map(|t| (*t).to_owned()).collect()
    }

    #[test]
    fn counter() {
        // Cases are defined as: metric name, delta, sample rate, tags, expected output.
        let cases = [
            ("name counter", 42, Some(0.10), &[][..], "name-counter:42|c|@0.10"),
            ("name counter", 42, None, &[][..], "name-counter:42|c"),
            ("name counter", 42, Some(0.10), &["tag1"][..], "name-counter:42|c|@0.10|#tag1"),
            ("name counter", 42, Some(1.0), &[][..], "name-counter:42|c"),
            ("requests", -7, Some(0.5), &["a", "b"][..], "requests:-7|c|@0.50|#a,b"),
            ("requests", 0, Some(0.0), &[][..], "requests:0|c|@0.00"),
        ];

        for (name, delta, rate, tag_list, expected) in cases {
            let rate = rate.map(|r| SampleRate::new(r).unwrap());
            let line = encode_counter(name, delta, rate, &tags(tag_list));
            assert_eq!(line.as_str(), expected);
        }
    }

    #[test]
    fn timing() {
        // Cases are defined as: metric name, milliseconds, tags, expected output.
        let cases = [
            ("timing", 3.2, &[][..], "timing:3.20|ms"),
            ("timing", 3.2, &["tag1"][..], "timing:3.20|ms|#tag1"),
            ("timing", 0.0, &[][..], "timing:0.00|ms"),
            ("timing", 12.345, &[][..], "timing:12.35|ms"),
            ("timing", 1.005, &[][..], "timing:1.01|ms"),
            ("timing", 1e20, &[][..], "timing:100000000000000000000.00|ms"),
        ];

        for (name, millis, tag_list, expected) in cases {
            let line = encode_timing(name, millis, &tags(tag_list)).unwrap();
            assert_eq!(line.as_str(), expected);
        }

        assert!(encode_timing("timing", f64::NAN, &[]).is_none());
        assert!(encode_timing("timing", f64::INFINITY, &[]).is_none());
    }

    #[test]
    fn gauge() {
        // Cases are defined as: metric name, value, tags, expected output.
        let cases = [
            ("name", NumericValue::from("value"), &[][..], "name:value|g"),
            ("name woo", NumericValue::from("value"), &[][..], "name-woo:value|g"),
            ("name", NumericValue::from("value woo"), &[][..], "name:value-woo|g"),
            ("name", NumericValue::from("value"), &["my", "tags"][..], "name:value|g|#my,tags"),
            ("gauge", NumericValue::from(1i8), &[][..], "gauge:1|g"),
            ("gauge", NumericValue::from(1i16), &[][..], "gauge:1|g"),
            ("gauge", NumericValue::from(1i32), &[][..], "gauge:1|g"),
            ("gauge", NumericValue::from(-1i64), &[][..], "gauge:-1|g"),
            ("gauge", NumericValue::from(1.1f32), &[][..], "gauge:1.10|g"),
            ("gauge", NumericValue::from(1.1f64), &[][..], "gauge:1.10|g"),
            ("gauge", NumericValue::from(-0.125f64), &[][..], "gauge:-0.13|g"),
            ("gauge", NumericValue::from(-0.001f64), &[][..], "gauge:0.00|g"),
            ("gauge", NumericValue::from(BigUint::from(1u32)), &[][..], "gauge:1|g"),
            ("gauge", NumericValue::from(u64::MAX), &[][..], "gauge:18446744073709551615|g"),
            (
                "gauge",
                NumericValue::from(BigDecimal::from_str("1.1").unwrap()),
                &[][..],
                "gauge:1.10|g",
            ),
            (
                "gauge",
                NumericValue::from(BigDecimal::from_str("2.675").unwrap()),
                &[][..],
                "gauge:2.68|g",
            ),
            ("gauge", NumericValue::from(BigDecimal::from_str("4e1").unwrap()), &[][..], "gauge:40.00|g"),
        ];

        for (name, value, tag_list, expected) in cases {
            let line = encode_gauge(name, &value, &tags(tag_list)).unwrap();
            assert_eq!(line.as_str(), expected);
        }
    }

    #[test]
    fn gauge_empty_tags_are_omitted() {
        let line = encode_gauge("name", &NumericValue::from("value"), &[]).unwrap();
        assert_eq!(line.as_str(), "name:value|g");
    }

    #[test]
    fn gauge_unrenderable_values() {
        assert!(encode_gauge("gauge", &NumericValue::Unsupported, &[]).is_none());
        assert!(encode_gauge("gauge", &NumericValue::Float(f64::NAN), &[]).is_none());
        assert!(encode_gauge("gauge", &NumericValue::Float(f64::NEG_INFINITY), &[]).is_none());
        assert!(NumericValue::Unsupported.render().is_none());
        assert!(NumericValue::from("text").render().is_some());
    }

    #[test]
    fn gauge_decimal_extreme_exponents() {
        let decimal = |s: &str| NumericValue::Decimal(BigDecimal::from_str(s).unwrap());

        // Cases are defined as: value, expected output.
        let cases = [
            ("1e-4000000000", Some("gauge:0.00|g")),
            ("-1e-4000000000", Some("gauge:0.00|g")),
            ("123456789e-4000000000", Some("gauge:0.00|g")),
            ("0.005", Some("gauge:0.01|g")),
            ("-0.005", Some("gauge:-0.01|g")),
            ("0.0049", Some("gauge:0.00|g")),
            ("-0.004", Some("gauge:0.00|g")),
            ("0.0009", Some("gauge:0.00|g")),
            ("0e-4000000000", Some("gauge:0.00|g")),
            ("1e3", Some("gauge:1000.00|g")),
            ("1e4000000000", None),
            ("-1e4000000000", None),
        ];

        for (value, expected) in cases {
            let line = encode_gauge("gauge", &decimal(value), &[]);
            assert_eq!(line.as_ref().map(EncodedLine::as_str), expected, "value: {value}");
        }
    }

    #[test]
    fn encoding_is_deterministic() {
        let tag_list = tags(&["env:prod", "host:a"]);
        let rate = SampleRate::new(0.25).ok();

        let first = encode_counter("hits total", 9, rate, &tag_list);
        let second = encode_counter("hits total", 9, rate, &tag_list);
        assert_eq!(first, second);
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn sanitize_collapses_runs() {
        let cases = [
            ("plain", "plain"),
            ("name counter", "name-counter"),
            ("a  \t\n b", "a-b"),
            (" leading", "-leading"),
            ("trailing ", "trailing-"),
            ("pipe|separated", "pipe-separated"),
            ("mixed | run", "mixed-run"),
        ];

        for (input, expected) in cases {
            assert_eq!(sanitize(input), expected);
        }
    }

    #[test]
    fn sanitize_borrows_clean_input() {
        assert!(matches!(sanitize("clean.name"), std::borrow::Cow::Borrowed(_)));
    }

    #[test]
    fn metric_names() {
        assert_eq!(metric_name(Some("prefix"), "gauge", None), "prefix.gauge");
        assert_eq!(metric_name(Some("prefix"), "timer", Some("p99")), "prefix.timer.p99");
        assert_eq!(metric_name(None, "timer", Some("p99")), "timer.p99");
        assert_eq!(metric_name(Some(""), "gauge", Some("")), "gauge");
    }

    #[test]
    fn sample_rate_bounds() {
        assert!(SampleRate::new(0.0).is_ok());
        assert!(SampleRate::new(1.0).is_ok());
        assert!(SampleRate::new(-0.1).is_err());
        assert!(SampleRate::new(1.5).is_err());
        assert!(SampleRate::new(f64::NAN).is_err());
        assert_eq!(SampleRate::try_from(0.5).unwrap().get(), 0.5);
    }

    #[test]
    fn big_integers() {
        use num_bigint::BigInt;

        assert_eq!(NumericValue::try_from(BigInt::from(-5i64)).unwrap(), NumericValue::Integer(-5));
        let huge = BigInt::from(u64::MAX) * 4u32;
        assert!(matches!(NumericValue::try_from(huge), Ok(NumericValue::Unsigned(_))));
        let huge_negative = BigInt::from(i64::MIN) * 4u32;
        assert!(NumericValue::try_from(huge_negative).is_err());
    }
}
