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
use std::path::PathBuf;

use anyhow::Result;
use structopt::StructOpt;

use crate::params::ModelParams;
use crate::stages;
use crate::store::pg::PgStoreProvider;

#[derive(StructOpt)]
pub struct DetectPlanesArgs {
    #[structopt(long, short = "c", help = "Postgres connection string for the job store")]
    pub pg_conn: String,

    #[structopt(long, help = "Job id whose schema holds the store tables")]
    pub job_id: i32,

    #[structopt(parse(from_os_str), long, help = "TOML file overriding the default model parameters")]
    pub params: Option<PathBuf>,
}

pub fn detect_planes(args: &DetectPlanesArgs) -> Result<()> {
    let params = ModelParams::load(args.params.as_deref())?;
    let provider = PgStoreProvider::new(&args.pg_conn, args.job_id);
    stages::detect_planes(&provider, &params)
}
