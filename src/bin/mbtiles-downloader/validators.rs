use mbtiles_downloader::{BoundingBox, MAX_ZOOM};

pub fn is_numeric_min(
    min: usize,
) -> impl Fn(&str) -> Result<usize, String> + Clone + Send + Sync + 'static {
    move |v: &str| {
        let val = v
            .parse::<usize>()
            .map_err(|_| "must be numeric".to_owned())?;

        if val < min {
            return Err(format!("must be >= {}", min));
        }

        Ok(val)
    }
}

pub fn is_zoom(v: &str) -> Result<u8, String> {
    let val = v.parse::<u8>().map_err(|_| "must be numeric".to_owned())?;

    if val > MAX_ZOOM {
        return Err(format!("must be <= {}", MAX_ZOOM));
    }

    Ok(val)
}

pub fn is_ratio(v: &str) -> Result<f64, String> {
    let val = v.parse::<f64>().map_err(|_| "must be numeric".to_owned())?;

    if !(0f64..=1f64).contains(&val) {
        return Err("must be within [0, 1]".to_owned());
    }

    Ok(val)
}

pub fn is_bounding_box(v: &str) -> Result<BoundingBox, String> {
    v.parse::<BoundingBox>().map_err(|e| format!("{:#}", e))
}
