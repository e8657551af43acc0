pub struct AddSensorArgs {
    /// Sensor as a JSON object
    pub json: String,
    /// Initial watermark, RFC 3339
    pub watermark: Option<String>,
}

pub struct SetWatermarkArgs {
    pub purpose_id: i64,
    pub watermark: String,
}

pub struct AttemptsArgs {
    pub purpose_id: i64,
    pub limit: Option<usize>,
}
