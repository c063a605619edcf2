use http::Response as HttpResponse;

use crate::body::Body;

/// A response read off the connection. Its body streams from the transport.
pub type Response = HttpResponse<Body>;
