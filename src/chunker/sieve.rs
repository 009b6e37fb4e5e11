//! Sieves: functions that find complete records in a byte buffer.

use regex::bytes::Regex;

/// Locates complete records in an accumulating buffer.
///
/// Returns `(start, end)` byte ranges, end exclusive, each covering exactly
/// one complete record. A partial record at the tail of the buffer must not
/// be reported; it will be offered again once more bytes arrive.
pub trait Sieve: Send {
    fn sieve(&self, buffer: &[u8]) -> Vec<(usize, usize)>;
}

impl<F> Sieve for F
where
    F: Fn(&[u8]) -> Vec<(usize, usize)> + Send,
{
    fn sieve(&self, buffer: &[u8]) -> Vec<(usize, usize)> {
        self(buffer)
    }
}

/// A sieve matching one or more byte regexes.
///
/// Matches of every pattern are merged and returned in buffer order.
#[derive(Clone, Debug)]
pub struct RegexSieve {
    patterns: Vec<Regex>,
}

impl RegexSieve {
    pub fn new<I, P>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn from_regexes(patterns: Vec<Regex>) -> Self {
        Self { patterns }
    }
}

impl Sieve for RegexSieve {
    fn sieve(&self, buffer: &[u8]) -> Vec<(usize, usize)> {
        let mut ranges: Vec<(usize, usize)> = self
            .patterns
            .iter()
            .flat_map(|re| re.find_iter(buffer).map(|m| (m.start(), m.end())))
            .collect();
        ranges.sort_unstable();
        ranges.dedup();
        ranges
    }
}
