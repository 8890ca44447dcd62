//! Python script variants handed to the interpreter.
//!
//! User code is an opaque payload: it is placed between fixed prelude and
//! epilogue segments and is never spliced into a format string.

use crate::utils::dedent;

const TIMED_PRELUDE: &str = "\
from mpi4py import MPI
import time

_comm = MPI.COMM_WORLD
_rank = _comm.rank
_size = _comm.size

_comm.Barrier()
_t0 = time.perf_counter()

";

const TIMED_EPILOGUE: &str = "

_comm.Barrier()
_t1 = time.perf_counter()

if _rank == 0:
    print(f\"\u{23f1} Elapsed time: {_t1 - _t0:.6f} s\")
";

const INFO_SCRIPT: &str = "\
from mpi4py import MPI
import dolfinx, sys, platform, os

comm = MPI.COMM_WORLD
if comm.rank == 0:
    print()
    print(\"\u{1f40d} Python          :\", sys.version.split()[0])
    print(\"\u{1f4e6} dolfinx         :\", dolfinx.__version__)
    print(\"\u{1f4bb} Platform        :\", platform.platform())
    print(\"\u{1f9f5} Running as root :\", os.geteuid() == 0)
";

const CHECK_SCRIPT: &str = "\
from mpi4py import MPI
import dolfinx
from dolfinx.mesh import create_unit_interval

comm = MPI.COMM_WORLD

mesh = create_unit_interval(comm, 8)

if comm.rank == 0:
    print(\"  \u{2705} dolfinx import OK\")
    print(\"  \u{2705} MPI size   :\", comm.size)
    print(\"  \u{2705} Mesh cells :\", mesh.topology.index_map(1).size_global)
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Script {
    /// User code as written.
    Plain(String),
    /// User code between two barriers; rank 0 reports the elapsed time.
    Timed(String),
    /// Rank-0 environment diagnostics; no user code.
    Info,
    /// Import + unit-interval mesh smoke test.
    Check,
}

impl Script {
    pub fn render(&self) -> String {
        match self {
            Self::Plain(code) => dedent(code),
            Self::Timed(code) => {
                let body = dedent(code);
                let mut out =
                    String::with_capacity(TIMED_PRELUDE.len() + body.len() + TIMED_EPILOGUE.len());
                out.push_str(TIMED_PRELUDE);
                out.push_str(&body);
                out.push_str(TIMED_EPILOGUE);
                out
            }
            Self::Info => INFO_SCRIPT.to_string(),
            Self::Check => CHECK_SCRIPT.to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Plain(_) => "plain",
            Self::Timed(_) => "timed",
            Self::Info => "info",
            Self::Check => "check",
        }
    }
}
