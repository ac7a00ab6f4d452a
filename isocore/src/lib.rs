// chemistry module
pub mod chemistry {
    pub mod elements;
    pub mod sum_formula;
    pub mod derivatization;
}

// algorithm module
pub mod algorithm {
    pub mod isotope;
    pub mod extraction;
    pub mod optimize;
    pub mod correction;
    pub mod integration;
    pub mod metrics;
    pub mod calibration;
}

// data module
pub mod data {
    pub mod scan;
    pub mod compound;
    pub mod chromatogram;
    pub mod areas;
}
