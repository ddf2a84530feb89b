pub const APP_NAME: &str = "morphpack";

/// Internal name the dictionary data is mounted under inside the bundled executable.
pub const DEFAULT_DATA_MOUNT: &str = "pymorphy_data";

/// Relative segment appended to a data package's root.
pub const DEFAULT_DATA_SUBDIR: &str = "data";

/// 315532800 = January 1, 1980 00:00:00 UTC (ZIP epoch)
pub const SOURCE_DATE_EPOCH: &str = "315532800";

/// Where the scratch workspace is mounted inside a container sandbox.
pub const CONTAINER_BUILD_DIR: &str = "/build";

/// Where a container sandbox writes its artifact.
pub const CONTAINER_OUTPUT_DIR: &str = "/output";

pub const DEFAULT_CONFIG_FILE: &str = "morphpack.toml";
