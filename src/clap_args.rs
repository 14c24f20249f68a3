/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Path to the config file
    #[arg(short, long, default_value = "./shakedown.toml")]
    pub config: String,

    /// Verbose mode (-v, --verbose)
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create an example config file in the current directory
    Init,

    /// Discover the cluster topology and print it
    Topology,

    /// Run a scenario against the cluster
    Run {
        /// Scenario tag, e.g. kill, disk-full, script
        scenario: String,

        /// Component kind for component-targeted scenarios
        #[arg(short = 'k', long)]
        component: Option<String>,

        /// Target addresses, script names or label values; defaults to
        /// every matching item
        items: Vec<String>,
    },
}

pub fn parse() -> Args {
    Args::parse()
}
