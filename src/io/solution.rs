//! Solution and run-metadata output.

use super::matrix_io::write_vector;
use crate::data::InversionProblem;
use crate::error::Result;
use crate::sa::{AnnealState, Energy};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

pub fn write_solution(path: &Path, solution: &[f64]) -> Result<()> {
    info!(path = %path.display(), len = solution.len(), "writing solution");
    write_vector(path, solution)
}

/// `<dir>/<stem>_metadata.txt` for a solution file, dropping a `.bin`
/// extension.
pub fn metadata_path(solution: &Path) -> PathBuf {
    let prefix = strip_bin(solution);
    let name = prefix
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    prefix.with_file_name(format!("{name}_metadata.txt"))
}

/// The solution path with a trailing `.bin` removed.
pub fn strip_bin(path: &Path) -> PathBuf {
    match path.extension() {
        Some(ext) if ext == "bin" => path.with_extension(""),
        _ => path.to_path_buf(),
    }
}

/// Human-readable summary of a finished run.
#[derive(Debug, Clone)]
pub struct RunMetadata<'a> {
    pub args: Vec<String>,
    pub criteria: String,
    pub threads: usize,
    pub problem: &'a InversionProblem,
    pub energy: &'a Energy,
    pub state: &'a AnnealState,
}

impl RunMetadata<'_> {
    pub fn render(&self) -> String {
        let mut out = String::new();
        // writing into a String cannot fail
        let _ = self.render_into(&mut out);
        out
    }

    fn render_into(&self, out: &mut String) -> std::fmt::Result {
        let p = self.problem;
        writeln!(out, "Simulated annealing inversion run completed")?;
        writeln!(out)?;
        writeln!(out, "Arguments: {}", self.args.join(" "))?;
        writeln!(out, "Completion Criteria: {}", self.criteria)?;
        writeln!(out, "Threads per node: {}", self.threads)?;
        writeln!(out)?;
        writeln!(out, "Solution size: {}", p.num_vars())?;
        writeln!(out, "A matrix size: {}x{}", p.equality().nrows(), p.equality().ncols())?;
        match p.inequality() {
            Some(ineq) => writeln!(out, "A_ineq matrix size: {}x{}", ineq.nrows(), ineq.ncols())?,
            None => writeln!(out, "A_ineq matrix size: (none)")?,
        }
        let joined: Vec<String> = self.energy.as_slice().iter().map(f64::to_string).collect();
        writeln!(out, "Best energy: {}", joined.join(", "))?;
        if !p.ranges().is_empty() {
            writeln!(out, "Energy type breakdown")?;
            for (range, e) in p.ranges().iter().zip(self.energy.ranges()) {
                writeln!(out, "\t{}\tenergy: {e}", range.short_name)?;
            }
        }

        let s = self.state;
        writeln!(out, "Total time: {} mins", s.elapsed.as_secs_f64() / 60.0)?;
        writeln!(out, "Total iterations: {}", s.iterations)?;
        let pct = if s.iterations > 0 {
            s.perturbs as f64 / s.iterations as f64 * 100.0
        } else {
            0.0
        };
        writeln!(out, "Total perturbations: {} ({pct:.3} %)", s.perturbs)?;
        writeln!(out, "Worse values kept: {}", s.worse_kept)?;
        writeln!(out, "Non-zero values: {}/{}", s.num_non_zero, p.num_vars())
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.render())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{csc_from_dense, ConstraintData, ConstraintRange};
    use std::time::Duration;

    #[test]
    fn test_metadata_path() {
        assert_eq!(
            metadata_path(Path::new("/tmp/out/sol.bin")),
            PathBuf::from("/tmp/out/sol_metadata.txt")
        );
        assert_eq!(
            metadata_path(Path::new("run")),
            PathBuf::from("run_metadata.txt")
        );
    }

    #[test]
    fn test_render_and_write() {
        let a = csc_from_dense(&[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        let eq = ConstraintData::new(a, vec![1.0, 1.0]).unwrap();
        let problem = InversionProblem::new(eq, vec![0.0, 0.0])
            .unwrap()
            .with_ranges(vec![
                ConstraintRange::new("Slip", "SR", 0, 1, false),
                ConstraintRange::new("Paleo", "PR", 1, 2, false),
            ])
            .unwrap();
        let energy = Energy::from_components(2.0, 0.0, 0.0, &[1.0, 1.0]);
        let state = AnnealState {
            elapsed: Duration::from_secs(120),
            iterations: 1000,
            perturbs: 250,
            worse_kept: 3,
            num_non_zero: 1,
            energy: energy.clone(),
        };
        let meta = RunMetadata {
            args: vec!["--threads".into(), "2".into()],
            criteria: "1000 iterations".into(),
            threads: 2,
            problem: &problem,
            energy: &energy,
            state: &state,
        };

        let text = meta.render();
        assert!(text.contains("Arguments: --threads 2"));
        assert!(text.contains("A matrix size: 2x2"));
        assert!(text.contains("A_ineq matrix size: (none)"));
        assert!(text.contains("Best energy: 2, 2, 0, 0, 1, 1"));
        assert!(text.contains("\tPR\tenergy: 1"));
        assert!(text.contains("Total time: 2 mins"));
        assert!(text.contains("Total perturbations: 250 (25.000 %)"));

        let dir = tempfile::tempdir().unwrap();
        let path = metadata_path(&dir.path().join("sol.bin"));
        meta.write(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), text);
    }
}
