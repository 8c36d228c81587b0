/*
This file is part of the Rooftop PV Suitability Model
Copyright (C) 2023 Novel-T

The Rooftop PV Suitability Model is free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation, either version 3 of the License, or
(at your option) any later version.

This program is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with this program.  If not, see <http://www.gnu.org/licenses/>.
*/
mod aggregate;
mod archetypes;
mod cmd_aggregate_yield;
mod cmd_check_lidar;
mod cmd_detect_planes;
mod cmd_place_panels;
mod cmd_run_model;
mod lidar_check;
mod panels;
mod params;
mod perimeter_gradient;
mod ransac;
mod roof_polygons;
mod stages;
mod store;
mod types;

use anyhow::Result;
use log::LevelFilter;
use simple_logger::SimpleLogger;
use structopt::StructOpt;

use crate::cmd_aggregate_yield::{aggregate_yield, AggregateYieldArgs};
use crate::cmd_check_lidar::{check_lidar, CheckLidarArgs};
use crate::cmd_detect_planes::{detect_planes, DetectPlanesArgs};
use crate::cmd_place_panels::{place_panels, PlacePanelsArgs};
use crate::cmd_run_model::{run_model, RunModelArgs};

#[derive(StructOpt)]
struct Cli {
    #[structopt(long, default_value = "Warn")]
    log_level: LevelFilter,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(StructOpt)]
enum Command {
    #[structopt(help = "Flag buildings whose LiDAR is missing or outdated")]
    CheckLidar(CheckLidarArgs),

    #[structopt(help = "Detect roof planes with RANSAC and build roof polygons")]
    DetectPlanes(DetectPlanesArgs),

    #[structopt(help = "Pack PV panels onto the usable roof polygons")]
    PlacePanels(PlacePanelsArgs),

    #[structopt(help = "Convert per-pixel solar model output to per-panel yields")]
    AggregateYield(AggregateYieldArgs),

    #[structopt(help = "Run every stage of the model in order")]
    RunModel(RunModelArgs),
}

fn run() -> Result<()> {
    let args = Cli::from_args();

    SimpleLogger::new().with_level(args.log_level).init()?;

    match &args.cmd {
        Command::CheckLidar(r) => {
            check_lidar(r)?;
        }
        Command::DetectPlanes(r) => {
            detect_planes(r)?;
        }
        Command::PlacePanels(r) => {
            place_panels(r)?;
        }
        Command::AggregateYield(r) => {
            aggregate_yield(r)?;
        }
        Command::RunModel(r) => {
            run_model(r)?;
        }
    }

    Ok(())
}

fn main() {
    run().unwrap();
}
