use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub raw_args: String,
    pub network_file: PathBuf,
    pub out_dir: PathBuf,
    pub out_name: String,
    pub seed_file: Option<PathBuf>,
    pub repeat: usize,
    pub resolution: f64,
    pub tolerance: f64,
    pub aggregation_tolerance: f64,
    pub tolerance_decline: f64,
    pub max_iterations: usize,
    pub max_passes: usize,
    pub threads: Option<usize>,
    pub silent: bool,
    pub print_clu: bool,
    pub print_stats: bool,
}

impl Config {
    pub fn any_output_enabled(&self) -> bool {
        self.print_clu || self.print_stats
    }
}
