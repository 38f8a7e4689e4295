//! BCI Launcher - operator front-end for brain-computer-interface experiments
//!
//! The launcher finds EEG amplifiers on the Lab Streaming Layer (LSL), edits
//! a subject's experiment parameters through a form generated from the
//! protocol's schema, and runs the experiment as child processes: a stream
//! recorder writing Zarr and a cue protocol emitting LSL markers. Both are
//! driven through stdin commands and report back with `STATUS` lines.
//!
//! # Command-Line Tools
//!
//! - `bci-launcher` - terminal front-end (the default binary)
//! - `bci-recorder` - record one amplifier, interactive or until Enter/Ctrl+C
//! - `bci-protocol` - run a trial protocol from a run snapshot
//! - `bci-viewer` - rolling per-channel statistics of an amplifier
//! - `bci-scan` - list the amplifiers on the network
//!
//! # Quick Start
//!
//! ```bash
//! export BCI_ROOT=$PWD BCI_DATA=$HOME/bci/data BCI_SCRIPTS=$HOME/bci/scripts
//! bci-scan --timeout 2
//! bci-recorder --record-dir /tmp/rec --amp-name MyAmp
//! bci-launcher
//! ```
//!
//! # Folder Layout
//!
//! ```text
//! $BCI_ROOT/config_files/<protocol>/structure_files/   parameter schemas
//! $BCI_ROOT/config_files/<protocol>/template_files/    configs for new subjects
//! $BCI_SCRIPTS/<subject>-<protocol>/                   subject configs
//! $BCI_DATA/<subject>-<protocol>/                      recordings, channelsList.txt
//! ```
//!
//! # Library Usage
//!
//! - [`state`] - run flags (stop/start/wait) on condition variables
//! - [`lsl`] - amplifier discovery and the recording loop
//! - [`zarr`] - Zarr store layout and buffered writer
//! - [`recorder`] - in-process recorder facade
//! - [`session`] - recorder/protocol subprocess supervisor
//! - [`config`] - typed experiment configuration
//! - [`protocol`] - trial plan and marker output
//!
//! # License
//!
//! This project is licensed under the GNU General Public License v3.0.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod lsl;
pub mod process;
pub mod protocol;
pub mod recorder;
pub mod session;
pub mod state;
pub mod status;
pub mod triggers;
pub mod viewer;
pub mod zarr;

/// Display GPL license notice for a program
pub fn display_license_notice(program_name: &str) {
	let version = env!("CARGO_PKG_VERSION");
	println!("{} {}", program_name, version);
	println!("This program comes with ABSOLUTELY NO WARRANTY.");
	println!("For details see https://www.gnu.org/licenses/gpl-3.0.html#license-text.");
	println!("This is free software, and you are welcome to redistribute it under certain conditions.");
	println!();
}
