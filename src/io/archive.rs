//! Zip bundle grouping every input of one inversion.
//!
//! Entries: `a.bin` and `d.bin` (required), `a_ineq.bin` with `d_ineq.bin`,
//! `initial.bin` and `constraintRanges.csv` (all optional).

use super::matrix_io::{decode_matrix, decode_vector, encode_matrix, encode_vector};
use crate::data::{ConstraintData, ConstraintRange, InversionProblem};
use crate::error::{AnnealError, Result};
use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::Path;
use tracing::debug;
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const EQUALITY_MATRIX: &str = "a.bin";
pub const EQUALITY_DATA: &str = "d.bin";
pub const INEQUALITY_MATRIX: &str = "a_ineq.bin";
pub const INEQUALITY_DATA: &str = "d_ineq.bin";
pub const INITIAL: &str = "initial.bin";
pub const RANGES: &str = "constraintRanges.csv";

const RANGES_HEADER: &str = "Name,Short Name,Inequality?,Start Row (inclusive),End Row (exclusive)";

/// Decoded archive contents.
#[derive(Debug, Clone)]
pub struct InversionInputs {
    pub equality: ConstraintData,
    pub inequality: Option<ConstraintData>,
    pub initial: Option<Vec<f64>>,
    pub ranges: Vec<ConstraintRange>,
}

impl InversionInputs {
    /// Builds a validated problem. A missing initial solution means all zeros;
    /// `initial` overrides the archived one.
    pub fn into_problem(
        self,
        initial: Option<Vec<f64>>,
        entropy_weight: f64,
    ) -> Result<InversionProblem> {
        let initial = initial
            .or(self.initial)
            .unwrap_or_else(|| vec![0.0; self.equality.ncols()]);
        let mut problem = InversionProblem::new(self.equality, initial)?;
        if let Some(ineq) = self.inequality {
            problem = problem.with_inequality(ineq)?;
        }
        problem
            .with_ranges(self.ranges)?
            .with_entropy_weight(entropy_weight)
    }
}

pub fn read_archive(path: &Path) -> Result<InversionInputs> {
    let mut zip = ZipArchive::new(File::open(path)?)?;

    let a = decode_matrix(&entry(&mut zip, EQUALITY_MATRIX)?)?;
    let d = decode_vector(&entry(&mut zip, EQUALITY_DATA)?)?;
    let equality = ConstraintData::new(a, d)?;

    let inequality = match (
        optional_entry(&mut zip, INEQUALITY_MATRIX)?,
        optional_entry(&mut zip, INEQUALITY_DATA)?,
    ) {
        (Some(a), Some(d)) => Some(ConstraintData::new(decode_matrix(&a)?, decode_vector(&d)?)?),
        (None, None) => None,
        _ => {
            return Err(AnnealError::config(format!(
                "archive must contain both {INEQUALITY_MATRIX} and {INEQUALITY_DATA} or neither"
            )))
        }
    };

    let initial = optional_entry(&mut zip, INITIAL)?
        .map(|b| decode_vector(&b))
        .transpose()?;
    let ranges = match optional_entry(&mut zip, RANGES)? {
        Some(b) => {
            let text = String::from_utf8(b)
                .map_err(|e| AnnealError::config(format!("{RANGES} is not UTF-8: {e}")))?;
            parse_ranges(&text)?
        }
        None => Vec::new(),
    };

    debug!(
        path = %path.display(),
        rows = equality.nrows(),
        cols = equality.ncols(),
        inequality = inequality.is_some(),
        ranges = ranges.len(),
        "read inversion archive"
    );
    Ok(InversionInputs {
        equality,
        inequality,
        initial,
        ranges,
    })
}

/// Writes `problem` as an archive, including its initial solution.
pub fn write_archive(path: &Path, problem: &InversionProblem) -> Result<()> {
    let mut zip = ZipWriter::new(File::create(path)?);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(EQUALITY_MATRIX, options)?;
    zip.write_all(&encode_matrix(&problem.equality().a)?)?;
    zip.start_file(EQUALITY_DATA, options)?;
    zip.write_all(&encode_vector(&problem.equality().d))?;
    if let Some(ineq) = problem.inequality() {
        zip.start_file(INEQUALITY_MATRIX, options)?;
        zip.write_all(&encode_matrix(&ineq.a)?)?;
        zip.start_file(INEQUALITY_DATA, options)?;
        zip.write_all(&encode_vector(&ineq.d))?;
    }
    zip.start_file(INITIAL, options)?;
    zip.write_all(&encode_vector(problem.initial()))?;
    if !problem.ranges().is_empty() {
        zip.start_file(RANGES, options)?;
        zip.write_all(format_ranges(problem.ranges()).as_bytes())?;
    }
    zip.finish()?;
    Ok(())
}

/// Parses the range table: a header line, then
/// `name,shortName,isInequality,startRow,endRow` per line.
pub fn parse_ranges(text: &str) -> Result<Vec<ConstraintRange>> {
    let mut ranges = Vec::new();
    for (lineno, line) in text.lines().enumerate().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        let bad = |what: &str| {
            AnnealError::config(format!("{RANGES} line {}: {what}: '{line}'", lineno + 1))
        };
        let fields = split_fields(line).map_err(bad)?;
        let [name, short, ineq, start, end] = fields.as_slice() else {
            return Err(bad("expected 5 fields"));
        };
        let inequality = ineq
            .to_ascii_lowercase()
            .parse::<bool>()
            .map_err(|_| bad("bad inequality flag"))?;
        let start_row: usize = start.parse().map_err(|_| bad("bad start row"))?;
        let end_row: usize = end.parse().map_err(|_| bad("bad end row"))?;
        if end_row < start_row {
            return Err(bad("end row before start row"));
        }
        ranges.push(ConstraintRange::new(
            name.as_str(),
            short.as_str(),
            start_row,
            end_row,
            inequality,
        ));
    }
    Ok(ranges)
}

pub fn format_ranges(ranges: &[ConstraintRange]) -> String {
    let mut out = String::from(RANGES_HEADER);
    out.push('\n');
    for r in ranges {
        out.push_str(&format!(
            "{},{},{},{},{}\n",
            quote_field(&r.name),
            quote_field(&r.short_name),
            r.inequality,
            r.start_row,
            r.end_row
        ));
    }
    out
}

fn quote_field(field: &str) -> String {
    if field.contains([',', '"']) || field.trim() != field {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Splits one CSV line. Unquoted fields are trimmed; quoted ones are kept
/// verbatim.
fn split_fields(line: &str) -> std::result::Result<Vec<String>, &'static str> {
    let mut fields = Vec::new();
    let mut rest = line;
    loop {
        let trimmed = rest.trim_start();
        let (field, after) = if let Some(quoted) = trimmed.strip_prefix('"') {
            let mut field = String::new();
            let mut chars = quoted.char_indices();
            let end = loop {
                match chars.next() {
                    Some((i, '"')) if quoted[i + 1..].starts_with('"') => {
                        field.push('"');
                        chars.next();
                    }
                    Some((i, '"')) => break i + 1,
                    Some((_, c)) => field.push(c),
                    None => return Err("unterminated quoted field"),
                }
            };
            (field, quoted[end..].trim_start())
        } else {
            let end = trimmed.find(',').unwrap_or(trimmed.len());
            (trimmed[..end].trim_end().to_string(), &trimmed[end..])
        };
        fields.push(field);
        match after.strip_prefix(',') {
            Some(next) => rest = next,
            None if after.is_empty() => return Ok(fields),
            None => return Err("text after closing quote"),
        }
    }
}

fn entry<R: Read + Seek>(zip: &mut ZipArchive<R>, name: &str) -> Result<Vec<u8>> {
    optional_entry(zip, name)?
        .ok_or_else(|| AnnealError::config(format!("archive is missing {name}")))
}

fn optional_entry<R: Read + Seek>(zip: &mut ZipArchive<R>, name: &str) -> Result<Option<Vec<u8>>> {
    let mut file = match zip.by_name(name) {
        Ok(f) => f,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut buf = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut buf)?;
    Ok(Some(buf))
}
