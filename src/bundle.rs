//! Conversion results persisted as JSON so decomposition and packing can be skipped
//! on later runs. The format carries no compatibility guarantees.
use std::{
    fs,
    io::{self, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::chain::Chain;
use crate::error::Result;
use crate::table::FeatureTable;
use crate::values::ValueMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    pub chains: Vec<Chain>,
    pub table: FeatureTable,
    pub values: ValueMap,
}

impl Bundle {
    pub fn from_json(json: &str) -> Result<Self> {
        let bundle: Bundle = serde_json::from_str(json)?;
        bundle.table.verify()?;
        Ok(bundle)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = fs::File::create(path)?;
        let mut writer = io::BufWriter::new(file);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = fs::File::open(path)?;
        let bundle: Bundle = serde_json::from_reader(io::BufReader::new(file))?;
        bundle.table.verify()?;
        Ok(bundle)
    }
}
