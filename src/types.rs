use ndarray::{Array1, Array2, ArrayD};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Floating point type used for band and coordinate data
pub type Real = f64;

/// N-dimensional band data (2D or 3D, spatial dimensions last)
pub type BandArray = ArrayD<Real>;

/// Boolean validity mask (true = valid pixel)
pub type MaskArray = ArrayD<bool>;

/// 2D coordinate array (rows x cols)
pub type CoordArray = Array2<Real>;

/// WKT of the WGS84 geographic CRS used for all output grids
pub const CRS_WKT_EPSG_4326: &str = r#"GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.01745329251994328,AUTHORITY["EPSG","9122"]],AUTHORITY["EPSG","4326"]]"#;

/// Attribute name carrying a band's valid-pixel expression
pub const VALID_PIXEL_EXPRESSION: &str = "valid_pixel_expression";

/// CF attributes marking a band as a flag (categorical) band
const FLAG_ATTRIBUTES: [&str; 3] = ["flag_masks", "flag_values", "flag_meanings"];

/// Attribute value as found in NetCDF/CF metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Integer(i64),
    Number(f64),
    Text(String),
    /// Integer vector such as CF `flag_masks`/`flag_values`
    IntegerList(Vec<i64>),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_integers(&self) -> Option<&[i64]> {
        match self {
            AttrValue::IntegerList(v) => Some(v.as_slice()),
            _ => None,
        }
    }
}

impl std::fmt::Display for AttrValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttrValue::Integer(v) => write!(f, "{}", v),
            AttrValue::Number(v) => write!(f, "{}", v),
            AttrValue::Text(s) => write!(f, "{}", s),
            AttrValue::IntegerList(v) => {
                let items: Vec<String> = v.iter().map(|i| i.to_string()).collect();
                write!(f, "{}", items.join(" "))
            }
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Text(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Text(s)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Number(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Integer(v)
    }
}

impl From<Vec<i64>> for AttrValue {
    fn from(v: Vec<i64>) -> Self {
        AttrValue::IntegerList(v)
    }
}

/// Attribute map (global or per band)
pub type Attrs = BTreeMap<String, AttrValue>;

/// Resampling role of a band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BandRole {
    /// Physical quantity, resampled bilinearly
    Continuous,
    /// Flags or class codes, resampled with nearest neighbour
    Categorical,
}

/// A single source or output band
#[derive(Debug, Clone)]
pub struct Band {
    pub data: BandArray,
    pub attrs: Attrs,
    pub role: BandRole,
}

impl Band {
    /// Create a band, inferring its role from CF flag attributes
    pub fn new(data: BandArray, attrs: Attrs) -> Self {
        let role = if FLAG_ATTRIBUTES.iter().any(|name| attrs.contains_key(*name)) {
            BandRole::Categorical
        } else {
            BandRole::Continuous
        };
        Self { data, attrs, role }
    }

    /// Create a continuous band without attributes
    pub fn continuous(data: BandArray) -> Self {
        Self {
            data,
            attrs: Attrs::new(),
            role: BandRole::Continuous,
        }
    }

    /// Create a categorical band without attributes
    pub fn categorical(data: BandArray) -> Self {
        Self {
            data,
            attrs: Attrs::new(),
            role: BandRole::Categorical,
        }
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(name.to_string(), value.into());
        self
    }

    /// Valid-pixel expression attached to this band, if any
    pub fn valid_pixel_expression(&self) -> Option<&str> {
        self.attrs.get(VALID_PIXEL_EXPRESSION).and_then(|v| v.as_str())
    }

    /// 1/0 array telling where the flag named `meaning` is raised.
    ///
    /// Uses `flag_masks` (all mask bits set) when present, otherwise `flag_values`
    /// (exact match). `None` if the band doesn't define the flag.
    pub fn flag_array(&self, meaning: &str) -> Option<BandArray> {
        let index = self
            .attrs
            .get("flag_meanings")?
            .as_str()?
            .split_whitespace()
            .position(|m| m == meaning)?;
        let flag = |v: bool| if v { 1.0 } else { 0.0 };
        if let Some(masks) = self.attrs.get("flag_masks").and_then(|v| v.as_integers()) {
            let mask = *masks.get(index)?;
            return Some(
                self.data
                    .mapv(|v| flag(v.is_finite() && (v as i64) & mask == mask)),
            );
        }
        let values = self.attrs.get("flag_values")?.as_integers()?;
        let value = *values.get(index)? as Real;
        Some(self.data.mapv(|v| flag(v == value)))
    }
}

/// Swath dataset with irregular per-pixel geolocation
#[derive(Debug, Clone)]
pub struct SourceDataset {
    pub lon: CoordArray,
    pub lat: CoordArray,
    pub bands: BTreeMap<String, Band>,
    pub attrs: Attrs,
}

impl SourceDataset {
    /// Create a dataset from coordinate arrays, checking they agree in shape
    pub fn new(lon: CoordArray, lat: CoordArray) -> GenResult<Self> {
        if lon.dim() != lat.dim() {
            return Err(GenError::ShapeMismatch {
                name: "lat".to_string(),
                expected: vec![lon.nrows(), lon.ncols()],
                actual: vec![lat.nrows(), lat.ncols()],
            });
        }
        Ok(Self {
            lon,
            lat,
            bands: BTreeMap::new(),
            attrs: Attrs::new(),
        })
    }

    /// Spatial shape (rows, cols) shared by coordinates and bands
    pub fn spatial_shape(&self) -> (usize, usize) {
        self.lon.dim()
    }

    /// Add a band, rejecting arrays whose trailing dimensions don't match the coordinates
    pub fn add_band(&mut self, name: &str, band: Band) -> GenResult<()> {
        self.check_band_shape(name, &band)?;
        self.bands.insert(name.to_string(), band);
        Ok(())
    }

    pub fn with_band(mut self, name: &str, band: Band) -> GenResult<Self> {
        self.add_band(name, band)?;
        Ok(self)
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(name.to_string(), value.into());
        self
    }

    /// Verify every band against the coordinate shape
    pub fn validate(&self) -> GenResult<()> {
        if self.lon.dim() != self.lat.dim() {
            return Err(GenError::ShapeMismatch {
                name: "lat".to_string(),
                expected: vec![self.lon.nrows(), self.lon.ncols()],
                actual: vec![self.lat.nrows(), self.lat.ncols()],
            });
        }
        for (name, band) in &self.bands {
            self.check_band_shape(name, band)?;
        }
        Ok(())
    }

    fn check_band_shape(&self, name: &str, band: &Band) -> GenResult<()> {
        let (rows, cols) = self.spatial_shape();
        let shape = band.data.shape();
        let ndim = shape.len();
        if !(2..=3).contains(&ndim) || shape[ndim - 2] != rows || shape[ndim - 1] != cols {
            return Err(GenError::ShapeMismatch {
                name: name.to_string(),
                expected: vec![rows, cols],
                actual: shape.to_vec(),
            });
        }
        Ok(())
    }
}

/// Bands resampled onto a regular WGS84 grid
#[derive(Debug, Clone)]
pub struct GriddedDataset {
    /// Cell-centre longitudes, ascending
    pub lon: Array1<Real>,
    /// Cell-centre latitudes, descending (north-up)
    pub lat: Array1<Real>,
    pub bands: BTreeMap<String, Band>,
    /// Per-band validity (false = no-data or masked by expression)
    pub masks: BTreeMap<String, MaskArray>,
    pub attrs: Attrs,
    /// Observation time range (t1, t2) in days since 1970-01-01, when known
    pub time_range: Option<(f64, f64)>,
}

impl GriddedDataset {
    /// Output grid shape (lat, lon)
    pub fn shape(&self) -> (usize, usize) {
        (self.lat.len(), self.lon.len())
    }
}

/// Geographic region (lon_min, lat_min, lon_max, lat_max)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub lon_min: f64,
    pub lat_min: f64,
    pub lon_max: f64,
    pub lat_max: f64,
}

impl Region {
    pub fn new(lon_min: f64, lat_min: f64, lon_max: f64, lat_max: f64) -> Self {
        Self {
            lon_min,
            lat_min,
            lon_max,
            lat_max,
        }
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.lon_min && lon <= self.lon_max && lat >= self.lat_min && lat <= self.lat_max
    }
}

/// Error types for cube generation
#[derive(Debug, thiserror::Error)]
pub enum GenError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Grid too sparse: {rows}x{cols} control points, need at least 2x2")]
    GridTooSparse { rows: usize, cols: usize },

    #[error("Shape mismatch for '{name}': expected trailing shape {expected:?}, got {actual:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Unsupported expression token '{token}' at position {position}")]
    UnsupportedExpression { token: String, position: usize },

    #[error("Unbound identifier '{name}' in expression")]
    UnboundIdentifier { name: String },

    #[error("Degenerate geometry: {0}")]
    DegenerateGeometry(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown input processor '{0}'")]
    UnknownProcessor(String),

    #[error("Band '{band}': {source}")]
    Band {
        band: String,
        #[source]
        source: Box<GenError>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parsing error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),
}

impl GenError {
    /// Attach a band name to an expression or data error
    pub fn for_band(self, band: &str) -> Self {
        match self {
            GenError::Band { .. } => self,
            other => GenError::Band {
                band: band.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Whether the error should abort a whole batch rather than just skip one dataset
    pub fn is_fatal_for_batch(&self) -> bool {
        match self {
            GenError::Configuration(_)
            | GenError::UnknownProcessor(_)
            | GenError::ConfigParse(_)
            | GenError::Io(_) => true,
            GenError::Band { source, .. } => source.is_fatal_for_batch(),
            _ => false,
        }
    }
}

/// Result type for cube generation
pub type GenResult<T> = Result<T, GenError>;
