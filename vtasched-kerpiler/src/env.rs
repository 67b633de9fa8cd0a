use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScheduleError};
use crate::pre::DType;

// the accelerator's json config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct HwConfig {
    pub target: String,
    pub log_inp_width: u32,
    pub log_wgt_width: u32,
    pub log_acc_width: u32,
    pub log_batch: u32,
    pub log_block: u32,
    pub log_uop_buff_size: u32,
    pub log_inp_buff_size: u32,
    pub log_wgt_buff_size: u32,
    pub log_acc_buff_size: u32,
}

impl Default for HwConfig {
    fn default() -> Self {
        HwConfig {
            target: "sim".into(),
            log_inp_width: 3,
            log_wgt_width: 3,
            log_acc_width: 5,
            log_batch: 0,
            log_block: 4,
            log_uop_buff_size: 15,
            log_inp_buff_size: 15,
            log_wgt_buff_size: 18,
            log_acc_buff_size: 17,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemScope {
    #[default]
    Global,
    InputLocal,
    WeightLocal,
    AccumulatorLocal,
}

impl std::fmt::Display for MemScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            MemScope::Global => "global",
            MemScope::InputLocal => "local.inp_buffer",
            MemScope::WeightLocal => "local.wgt_buffer",
            MemScope::AccumulatorLocal => "local.acc_buffer",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instr {
    // pragma: move the loop body's data between scopes
    DmaCopy,
    // pragma: run the loop body on the vector ALU
    Alu,
    // tensorize: replace the loop body with one matrix-multiply-accumulate
    Gemm,
}

impl std::fmt::Display for Instr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Instr::DmaCopy => "dma_copy",
            Instr::Alu => "alu",
            Instr::Gemm => "gemm",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwEnv {
    pub cfg: HwConfig,
    pub batch: usize,
    pub block_in: usize,
    pub block_out: usize,
    pub inp_dtype: DType,
    pub wgt_dtype: DType,
    pub acc_dtype: DType,
}

impl Default for HwEnv {
    fn default() -> Self {
        HwEnv {
            cfg: HwConfig::default(),
            batch: 1,
            block_in: 16,
            block_out: 16,
            inp_dtype: DType::I8,
            wgt_dtype: DType::I8,
            acc_dtype: DType::I32,
        }
    }
}

impl HwEnv {
    pub fn new(cfg: HwConfig) -> Result<Self> {
        let width = |name: &str, w: u32| DType::int_of_log_width(w)
            .ok_or_else(|| ScheduleError::Config(format!("{name}={w} is not a supported width")));
        if cfg.log_batch > 8 || cfg.log_block > 8 {
            Err(ScheduleError::Config(format!("block {}x{} is too large", cfg.log_batch, cfg.log_block)))?
        }
        Ok(HwEnv {
            batch: 1 << cfg.log_batch,
            block_in: 1 << cfg.log_block,
            block_out: 1 << cfg.log_block,
            inp_dtype: width("LOG_INP_WIDTH", cfg.log_inp_width)?,
            wgt_dtype: width("LOG_WGT_WIDTH", cfg.log_wgt_width)?,
            acc_dtype: width("LOG_ACC_WIDTH", cfg.log_acc_width)?,
            cfg,
        })
    }
    pub fn from_json(text: &str) -> Result<Self> {
        let cfg = serde_json::from_str(text).map_err(|e| ScheduleError::Config(e.to_string()))?;
        Self::new(cfg)
    }
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ScheduleError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }
}
